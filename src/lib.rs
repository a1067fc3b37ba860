//! A chunk-at-a-time JIT translator for a 16-bit register virtual CPU.
//!
//! Instead of interpreting one instruction per cycle, the translator
//! scans forward from the program counter for a maximal straight-line
//! run of instructions (a chunk), resolves every operand once, and
//! builds an executable fragment the dispatch loop invokes directly.
//! A run-time guard catches programs that write into their own chunk
//! while it is executing.

pub mod boundary;
pub mod compiler;
pub mod config;
pub mod emitter;
pub mod fragment;
pub mod instruction;
pub mod machine;
pub mod operand;
pub mod processor;
pub mod test_utils;
