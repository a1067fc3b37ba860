//! Chunk boundary analysis.
//!
//! A chunk is the maximal straight-line run of instructions starting at
//! an entry address. The scan stops after the first instruction that
//! stores into the program counter, with one wrinkle: a comparison
//! opcode skips the following instruction at run time, so a PC write
//! right after a comparison may never execute and must not end the scan.

use crate::instruction::Instruction;
use log::debug;

/// Skip-chain state carried across the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Normal,
    /// The previous instruction was a comparison, so the current one is
    /// conditional and cannot be treated as a hard chunk terminator.
    PrecededBySkip,
}

/// Find the end of the chunk starting at `start`, returning the first
/// address past it. The result only depends on memory contents, so
/// re-running it over unchanged memory is deterministic.
pub fn chunk_end(memory: &[u16], start: u16) -> u16 {
    let mut cursor = start;
    let mut state = ScanState::Normal;

    loop {
        let inst = Instruction::decode(memory, cursor);
        cursor = cursor.wrapping_add(inst.size);

        if state == ScanState::Normal && inst.modifies_pc() {
            break;
        }
        state = if inst.is_conditional() {
            ScanState::PrecededBySkip
        } else {
            ScanState::Normal
        };

        // Wrapped around the address space; stop the scan rather than
        // revisit the entry.
        if cursor <= start {
            break;
        }
    }

    debug!("chunk at {:04x} ends at {:04x}", start, cursor);
    cursor
}
