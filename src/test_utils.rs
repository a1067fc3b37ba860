//! Helpers for assembling instruction words and pre-loaded machines.
//! Used by the test suite and the demo driver.

use crate::instruction::Opcode;
use crate::machine::Machine;

/// Assemble one basic-family instruction word.
pub fn basic(op: Opcode, a: u8, b: u8) -> u16 {
    op.nibble() | (((a as u16) & 0x3F) << 4) | (((b as u16) & 0x3F) << 10)
}

/// Assemble one extended-family instruction word.
pub fn ext(ext_opcode: u8, operand: u8) -> u16 {
    (((ext_opcode as u16) & 0x3F) << 4) | (((operand as u16) & 0x3F) << 10)
}

/// Descriptor for a small embedded literal (0 to 31).
pub fn lit(value: u16) -> u8 {
    0x20 | (value as u8 & 0x1F)
}

/// A machine with `words` loaded at address zero.
pub fn machine_with(words: &[u16]) -> Machine {
    let mut machine = Machine::new();
    machine
        .load(0, words)
        .expect("test program must fit in memory");
    machine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand;

    #[test]
    fn assembles_the_documented_layout() {
        // add [next], #1: opcode 2, a=0x1F, b=0x21
        let word = basic(Opcode::Add, operand::NEXT_LITERAL, lit(1));
        assert_eq!(word, 0x2 | (0x1F << 4) | (0x21 << 10));
    }

    #[test]
    fn embedded_literals_mask_to_five_bits() {
        assert_eq!(lit(0), 0x20);
        assert_eq!(lit(31), 0x3F);
    }
}
