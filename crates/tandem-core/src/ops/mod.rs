//! Opcodes and transactions

/// Single invertible graph edits
pub mod opcode;
/// Atomic groups of opcodes
pub mod transaction;

pub use opcode::{Direction, Mode, Op, OpFlags, Opcode};
pub use transaction::Transaction;
