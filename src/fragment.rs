//! Executable fragments.
//!
//! A fragment is the compiled form of one chunk: a vector of steps, one
//! per source instruction, with every operand already resolved to a
//! plan. Running a fragment is a tight dispatch loop over the steps; it
//! ends when an instruction stores into the program counter, when a
//! conditional skip lands past the last step, or when the
//! self-modification guard fires.

use crate::emitter;
use crate::instruction::Opcode;
use crate::machine::Machine;
use crate::operand::{OperandPlan, Place};
use log::debug;

/// One translated instruction.
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub kind: StepKind,
    /// Address of the instruction after this one. Guard checks, skip
    /// exits and call return addresses are all anchored here.
    pub next: u16,
}

#[derive(Debug, Clone, Copy)]
pub enum StepKind {
    /// A value-producing operation with writeback.
    Op {
        op: Opcode,
        a: OperandPlan,
        b: OperandPlan,
        /// Destination is the program counter; executing this step ends
        /// the fragment with PC live.
        modifies_pc: bool,
    },
    /// A comparison. On a false condition the following instruction is
    /// skipped; `skip_past` is the address just beyond it, used when the
    /// skipped instruction is the fragment's last.
    Test {
        op: Opcode,
        a: OperandPlan,
        b: OperandPlan,
        skip_past: u16,
    },
    /// The extended call: jump to the target and push the return
    /// address.
    Call { target: OperandPlan },
}

/// Per-step control flow outcome.
enum Flow {
    Continue,
    /// Condition false: skip the following instruction.
    Skip,
    /// PC was stored; leave the fragment with it live.
    Jump,
    /// The guard fired; PC already points at the instruction boundary.
    Abort,
}

/// A compiled chunk's executable form. The single entry point is
/// [`Fragment::run`]; the machine state is its only dependency, and the
/// fragment itself is immutable and re-runnable.
#[derive(Debug)]
pub struct Fragment {
    steps: Vec<Step>,
    start: u16,
    /// First address past the analyzed chunk; the guard protects
    /// everything from the current step's `next` up to here.
    end: u16,
    signed_divide: bool,
}

impl Fragment {
    pub(crate) fn new(steps: Vec<Step>, start: u16, end: u16, signed_divide: bool) -> Fragment {
        Fragment {
            steps,
            start,
            end,
            signed_divide,
        }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Run the fragment to one of its exits. On return the machine's PC
    /// names the next instruction to execute.
    pub fn run(&self, machine: &mut Machine) {
        let mut index = 0;
        while index < self.steps.len() {
            let step = &self.steps[index];
            match self.execute(step, machine) {
                Flow::Continue => index += 1,
                Flow::Skip => {
                    if index + 2 < self.steps.len() {
                        index += 2;
                    } else {
                        // The skipped instruction is the last one we
                        // compiled (or lies past the fragment); resume
                        // from just beyond it.
                        let resume = match step.kind {
                            StepKind::Test { skip_past, .. } => skip_past,
                            _ => step.next,
                        };
                        debug!("skip exit at {:04x}", resume);
                        machine.pc = resume;
                        return;
                    }
                }
                Flow::Jump => return,
                Flow::Abort => return,
            }
        }
        // fell off the end of a degenerate chunk
        machine.pc = self.end;
    }

    fn execute(&self, step: &Step, machine: &mut Machine) -> Flow {
        match step.kind {
            StepKind::Test { op, a, b, .. } => {
                let a = a.evaluate(machine, true);
                let b = b.evaluate(machine, true);
                if emitter::condition(op, a.value, b.value) {
                    Flow::Continue
                } else {
                    Flow::Skip
                }
            }
            StepKind::Op {
                op,
                a,
                b,
                modifies_pc,
            } => {
                let dest = a.evaluate(machine, op.reads_destination());
                let src = b.evaluate(machine, true);
                let out = emitter::apply(op, dest.value, src.value, self.signed_divide);

                match dest.place {
                    Place::Register(register) => machine.set_reg(register, out.value),
                    Place::Memory(address) => machine.write(address, out.value),
                    Place::None => {} // literal destination, result discarded
                }
                if let Some(overflow) = out.overflow {
                    machine.overflow = overflow;
                }

                if let Place::Memory(address) = dest.place {
                    if self.hits_unexecuted(address, step.next) {
                        debug!(
                            "write to {:04x} lands in [{:04x},{:04x}), aborting fragment",
                            address, step.next, self.end
                        );
                        machine.pc = step.next;
                        return Flow::Abort;
                    }
                }

                if modifies_pc {
                    return Flow::Jump;
                }
                Flow::Continue
            }
            StepKind::Call { target } => {
                let target = target.evaluate(machine, true);
                machine.pc = target.value;
                machine.sp = machine.sp.wrapping_sub(1);
                let slot = machine.sp;
                machine.write(slot, step.next);
                if self.hits_unexecuted(slot, step.next) {
                    debug!("call pushed over its own chunk at {:04x}, aborting", slot);
                    machine.pc = step.next;
                    return Flow::Abort;
                }
                Flow::Jump
            }
        }
    }

    /// True when a just-written address lies inside the chunk's
    /// still-unexecuted remainder, making the compiled steps stale.
    fn hits_unexecuted(&self, address: u16, after: u16) -> bool {
        address >= after && address < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Register;
    use crate::operand::OperandPlan;

    fn op_step(op: Opcode, a: OperandPlan, b: OperandPlan, next: u16) -> Step {
        Step {
            kind: StepKind::Op {
                op,
                a,
                b,
                modifies_pc: false,
            },
            next,
        }
    }

    #[test]
    fn runs_steps_in_order_and_exits_at_the_end() {
        let steps = vec![
            op_step(
                Opcode::Set,
                OperandPlan::Register(Register::A),
                OperandPlan::Literal(5),
                1,
            ),
            op_step(
                Opcode::Add,
                OperandPlan::Register(Register::A),
                OperandPlan::Literal(7),
                2,
            ),
        ];
        let fragment = Fragment::new(steps, 0, 2, false);
        let mut machine = Machine::new();
        fragment.run(&mut machine);
        assert_eq!(machine.reg(Register::A), 12);
        assert_eq!(machine.pc, 2);
    }

    #[test]
    fn pc_write_leaves_the_fragment() {
        let steps = vec![
            op_step(
                Opcode::Set,
                OperandPlan::Register(Register::A),
                OperandPlan::Literal(1),
                1,
            ),
            Step {
                kind: StepKind::Op {
                    op: Opcode::Set,
                    a: OperandPlan::PcValue { next: 2 },
                    b: OperandPlan::Literal(0x0100),
                    modifies_pc: true,
                },
                next: 2,
            },
            op_step(
                Opcode::Set,
                OperandPlan::Register(Register::B),
                OperandPlan::Literal(9),
                3,
            ),
        ];
        let fragment = Fragment::new(steps, 0, 3, false);
        let mut machine = Machine::new();
        fragment.run(&mut machine);
        assert_eq!(machine.pc, 0x0100);
        // the step after the jump never ran
        assert_eq!(machine.reg(Register::B), 0);
    }

    #[test]
    fn guard_aborts_on_write_into_remaining_range() {
        let steps = vec![
            op_step(
                Opcode::Set,
                OperandPlan::IndirectWord(2),
                OperandPlan::Literal(0xDEAD),
                1,
            ),
            op_step(
                Opcode::Set,
                OperandPlan::Register(Register::A),
                OperandPlan::Literal(1),
                2,
            ),
        ];
        let fragment = Fragment::new(steps, 0, 3, false);
        let mut machine = Machine::new();
        fragment.run(&mut machine);
        // the write landed at address 2, inside [1, 3)
        assert_eq!(machine.read(2), 0xDEAD);
        assert_eq!(machine.pc, 1);
        assert_eq!(machine.reg(Register::A), 0);
    }

    #[test]
    fn guard_ignores_writes_behind_the_cursor() {
        let steps = vec![
            op_step(
                Opcode::Set,
                OperandPlan::IndirectWord(0),
                OperandPlan::Literal(0xBEEF),
                1,
            ),
            op_step(
                Opcode::Set,
                OperandPlan::Register(Register::A),
                OperandPlan::Literal(1),
                2,
            ),
        ];
        let fragment = Fragment::new(steps, 0, 3, false);
        let mut machine = Machine::new();
        fragment.run(&mut machine);
        assert_eq!(machine.read(0), 0xBEEF);
        assert_eq!(machine.reg(Register::A), 1);
        assert_eq!(machine.pc, 3);
    }
}
