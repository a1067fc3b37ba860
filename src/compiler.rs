//! Chunk translation.
//!
//! `compile` turns the straight-line run of instructions at an entry
//! address into an executable [`Fragment`]: it asks the boundary
//! analyzer for the chunk's extent, then walks the instructions once,
//! resolving operands into plans and emitting one step per instruction.
//! Translation itself cannot fail; the only refusal is an unsupported
//! extended opcode, reported as the distinct [`Uncompilable`] outcome so
//! the loader can fall back to single-instruction dispatch.

use crate::boundary;
use crate::fragment::{Fragment, Step, StepKind};
use crate::instruction::{Cursor, Instruction, Opcode, EXT_CALL};
use crate::operand;
use log::debug;
use std::fmt;

/// The distinct non-fatal "cannot compile this chunk" outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uncompilable {
    /// Address of the offending instruction.
    pub addr: u16,
    /// The unsupported extended opcode found there.
    pub ext_opcode: u8,
}

impl fmt::Display for Uncompilable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unsupported extended opcode {:#04x} at {:04x}",
            self.ext_opcode, self.addr
        )
    }
}

impl std::error::Error for Uncompilable {}

/// Translation switches threaded down from the runtime configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Route the divide overflow through a signed 32-bit intermediate.
    pub signed_divide: bool,
}

/// A freshly translated chunk: its address range and its fragment. Not
/// retained anywhere; every entry into the range recompiles from the
/// current memory contents.
#[derive(Debug)]
pub struct Chunk {
    pub start: u16,
    pub end: u16,
    pub fragment: Fragment,
}

/// Compile the chunk starting at `start`.
pub fn compile(memory: &[u16], start: u16, options: Options) -> Result<Chunk, Uncompilable> {
    let end = boundary::chunk_end(memory, start);
    translate(memory, start, end, None, options)
}

/// Compile exactly one instruction into a degenerate single-step chunk.
/// This is the loader's non-JIT fallback path.
pub fn compile_single(memory: &[u16], start: u16, options: Options) -> Result<Chunk, Uncompilable> {
    let end = Instruction::decode(memory, start).next_addr();
    translate(memory, start, end, Some(1), options)
}

fn translate(
    memory: &[u16],
    start: u16,
    end: u16,
    max_steps: Option<usize>,
    options: Options,
) -> Result<Chunk, Uncompilable> {
    let mut cursor = Cursor::new(memory, start);
    let mut steps: Vec<Step> = Vec::new();
    let mut trampoline = false;

    loop {
        let addr = cursor.pos;
        let word = cursor.next_word();
        let nibble = word & 0x000F;
        let a = ((word >> 4) & 0x3F) as u8;
        let b = ((word >> 10) & 0x3F) as u8;

        if nibble == 0 {
            if a != EXT_CALL {
                debug!("chunk at {:04x} refused: extended opcode {:#04x}", start, a);
                return Err(Uncompilable { addr, ext_opcode: a });
            }
            let target = operand::resolve(b, &mut cursor);
            steps.push(Step {
                kind: StepKind::Call { target },
                next: cursor.pos,
            });
            // a call always transfers control, so emission stops here
            break;
        }

        let Some(op) = Opcode::from_nibble(nibble) else {
            unreachable!("nibble 0 is the extended family, handled above");
        };

        let bounced = trampoline;
        trampoline = op.is_conditional();

        let a_plan = operand::resolve(a, &mut cursor);
        let b_plan = operand::resolve(b, &mut cursor);
        let next = cursor.pos;
        let modifies_pc = a == operand::PC && op.writes_back();

        let kind = if op.is_conditional() {
            let following = Instruction::decode(memory, next);
            StepKind::Test {
                op,
                a: a_plan,
                b: b_plan,
                skip_past: following.next_addr(),
            }
        } else {
            StepKind::Op {
                op,
                a: a_plan,
                b: b_plan,
                modifies_pc,
            }
        };
        steps.push(Step { kind, next });

        // a hard PC write ends the chunk; one sitting in a comparison's
        // shadow may never execute and does not
        if modifies_pc && !bounced {
            break;
        }
        if max_steps.is_some_and(|limit| steps.len() >= limit) {
            break;
        }
        // wrapped back to the entry; stop like the boundary scan does
        if cursor.pos <= start {
            break;
        }
    }

    debug!(
        "compiled chunk [{:04x},{:04x}): {} steps",
        start,
        end,
        steps.len()
    );
    Ok(Chunk {
        start,
        end,
        fragment: Fragment::new(steps, start, end, options.signed_divide),
    })
}
