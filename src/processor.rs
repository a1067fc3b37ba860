//! The dispatch loop.
//!
//! The processor owns the machine state and drives the
//! translate-and-run cycle: compile a chunk at the live PC, run its
//! fragment, and repeat from wherever execution stopped. Chunks whose
//! entry sits in front of an unsupported extended opcode fall back to
//! single-instruction dispatch so one bad opcode never takes the whole
//! run down.

use crate::compiler::{self, Options, Uncompilable};
use crate::config::Config;
use crate::instruction::{Instruction, InstructionKind, EXT_CALL};
use crate::machine::Machine;
use log::{debug, info, warn};

/// Safety net against runaway programs when no limit is configured.
const HARD_CHUNK_LIMIT: u64 = 10_000_000;

/// What one dispatch at the live PC did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// A fragment compiled and ran to one of its exits.
    Executed { start: u16, end: u16 },
    /// The chunk was uncompilable; the fallback handled the single
    /// instruction at `addr` instead.
    Fallback { addr: u16, cause: Uncompilable },
}

pub struct Processor {
    pub machine: Machine,
    config: Config,
    chunks_dispatched: u64,
}

impl Processor {
    pub fn new(machine: Machine) -> Self {
        Processor::with_config(machine, Config::default())
    }

    pub fn with_config(machine: Machine, config: Config) -> Self {
        Processor {
            machine,
            config,
            chunks_dispatched: 0,
        }
    }

    pub fn chunks_dispatched(&self) -> u64 {
        self.chunks_dispatched
    }

    fn options(&self) -> Options {
        Options {
            signed_divide: self.config.compat.signed_divide,
        }
    }

    /// Translate and run one chunk at the live PC.
    pub fn dispatch(&mut self) -> DispatchResult {
        let entry = self.machine.pc;
        self.chunks_dispatched += 1;

        match compiler::compile(&self.machine.memory, entry, self.options()) {
            Ok(chunk) => {
                debug!(
                    "dispatching chunk [{:04x},{:04x}), {} steps",
                    chunk.start,
                    chunk.end,
                    chunk.fragment.step_count()
                );
                chunk.fragment.run(&mut self.machine);
                debug!("fragment returned, pc={:04x}", self.machine.pc);
                DispatchResult::Executed {
                    start: chunk.start,
                    end: chunk.end,
                }
            }
            Err(cause) => self.dispatch_fallback(entry, cause),
        }
    }

    /// Non-JIT path for an uncompilable chunk: handle exactly the entry
    /// instruction, then let the next dispatch retry from the new PC.
    fn dispatch_fallback(&mut self, entry: u16, cause: Uncompilable) -> DispatchResult {
        let inst = Instruction::decode(&self.machine.memory, entry);

        if let InstructionKind::Extended(ext) = inst.kind {
            if ext != EXT_CALL {
                // reserved opcodes have no architectural effect
                warn!(
                    "reserved extended opcode {:#04x} at {:04x}, stepping over",
                    ext, entry
                );
                self.machine.pc = inst.next_addr();
                return DispatchResult::Fallback { addr: entry, cause };
            }
        }

        // The refused opcode sits deeper in the chunk; the entry
        // instruction itself is fine, so run it alone.
        match compiler::compile_single(&self.machine.memory, entry, self.options()) {
            Ok(chunk) => {
                debug!("single-stepping {} at {:04x}", inst, entry);
                chunk.fragment.run(&mut self.machine);
                DispatchResult::Fallback { addr: entry, cause }
            }
            Err(inner) => {
                warn!("fallback could not translate {:04x} ({}), stepping over", entry, inner);
                self.machine.pc = inst.next_addr();
                DispatchResult::Fallback {
                    addr: entry,
                    cause: inner,
                }
            }
        }
    }

    /// Run the dispatch loop until the program pins its PC in place, the
    /// chunk limit is reached, or the hard safety limit trips.
    pub fn run_with_limit(&mut self, max_chunks: Option<u64>) -> Result<(), String> {
        info!("starting dispatch loop at pc {:04x}", self.machine.pc);
        loop {
            let before = self.machine.pc;
            self.dispatch();

            if self.machine.pc == before {
                // a jump back to its own entry; nothing can change now
                info!("pc pinned at {:04x}, halting", before);
                return Ok(());
            }
            if let Some(limit) = max_chunks {
                if self.chunks_dispatched >= limit {
                    info!("reached chunk limit of {}", limit);
                    return Ok(());
                }
            }
            if self.chunks_dispatched >= HARD_CHUNK_LIMIT {
                return Err("chunk limit exceeded".to_string());
            }
        }
    }

    /// Run with the configured limit.
    pub fn run(&mut self) -> Result<(), String> {
        self.run_with_limit(self.config.limits.max_chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Opcode;
    use crate::machine::Register;
    use crate::operand;
    use crate::test_utils::{basic, ext, lit, machine_with};

    #[test]
    fn dispatch_runs_one_chunk() {
        let machine = machine_with(&[
            basic(Opcode::Set, 0x00, lit(5)),
            basic(Opcode::Set, operand::PC, operand::NEXT_LITERAL),
            0x0100,
        ]);
        let mut processor = Processor::new(machine);
        let result = processor.dispatch();
        assert_eq!(result, DispatchResult::Executed { start: 0, end: 3 });
        assert_eq!(processor.machine.reg(Register::A), 5);
        assert_eq!(processor.machine.pc, 0x0100);
    }

    #[test]
    fn loop_runs_across_chunks() {
        // chunk one jumps to chunk two, which pins pc on itself
        let machine = machine_with(&[
            basic(Opcode::Set, 0x00, lit(1)),
            basic(Opcode::Set, operand::PC, lit(3)),
            0,
            basic(Opcode::Add, 0x00, lit(2)),
            basic(Opcode::Set, operand::PC, operand::NEXT_LITERAL),
            0x0004,
        ]);
        let mut processor = Processor::new(machine);
        processor.run_with_limit(Some(10)).unwrap();
        assert_eq!(processor.machine.reg(Register::A), 3);
        assert_eq!(processor.machine.pc, 0x0004);
    }

    #[test]
    fn fallback_steps_over_reserved_opcode() {
        let machine = machine_with(&[
            ext(0x05, lit(0)),
            basic(Opcode::Set, 0x00, lit(7)),
            basic(Opcode::Set, operand::PC, operand::NEXT_LITERAL),
            0x0004,
            basic(Opcode::Set, operand::PC, operand::NEXT_LITERAL),
            0x0004,
        ]);
        let mut processor = Processor::new(machine);
        let result = processor.dispatch();
        match result {
            DispatchResult::Fallback { addr, cause } => {
                assert_eq!(addr, 0);
                assert_eq!(cause.ext_opcode, 0x05);
            }
            other => panic!("expected fallback, got {:?}", other),
        }
        assert_eq!(processor.machine.pc, 1);

        // the rest of the program still runs
        processor.run_with_limit(Some(10)).unwrap();
        assert_eq!(processor.machine.reg(Register::A), 7);
    }

    #[test]
    fn fallback_single_steps_when_the_bad_opcode_is_deeper() {
        let machine = machine_with(&[
            basic(Opcode::Set, 0x00, lit(9)), // fine on its own
            ext(0x3F, lit(0)),                // poisons the chunk
            basic(Opcode::Set, operand::PC, lit(0)),
        ]);
        let mut processor = Processor::new(machine);
        let result = processor.dispatch();
        match result {
            DispatchResult::Fallback { addr, cause } => {
                assert_eq!(addr, 0);
                assert_eq!(cause.addr, 1);
            }
            other => panic!("expected fallback, got {:?}", other),
        }
        // the entry instruction executed alone
        assert_eq!(processor.machine.reg(Register::A), 9);
        assert_eq!(processor.machine.pc, 1);
    }

    #[test]
    fn chunk_limit_stops_a_ping_pong_loop() {
        // two jumps bouncing between each other never pin the pc
        let machine = machine_with(&[
            basic(Opcode::Set, operand::PC, lit(2)),
            0,
            basic(Opcode::Set, operand::PC, lit(0)),
        ]);
        let mut processor = Processor::new(machine);
        processor.run_with_limit(Some(5)).unwrap();
        assert_eq!(processor.chunks_dispatched(), 5);
    }

    #[test]
    fn run_halts_when_pc_pins() {
        let machine = machine_with(&[
            basic(Opcode::Set, operand::PC, operand::NEXT_LITERAL),
            0x0000,
        ]);
        let mut processor = Processor::new(machine);
        processor.run_with_limit(None).unwrap();
        assert_eq!(processor.machine.pc, 0);
    }
}
