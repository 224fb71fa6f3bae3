//! Atomic types of the Weir validation VM.
//!
//! This crate defines the instruction set executed by the streaming
//! validator: opcode and operand encodings, branch conditions, the stable
//! validation error codes, the encoded [`Program`] container and the
//! table-encoded [`Dfa`] runtime. The compiler pipeline that produces
//! programs lives in the `weir-vm` crate.

#![warn(missing_docs)]

mod dfa;
mod error_code;
mod instruction;
mod opcode;
mod program;
mod token_kind;

#[cfg(test)]
mod encoding_tests;

pub use dfa::Dfa;
pub use error_code::ErrorCode;
pub use instruction::{
    Instruction, Operand, RawInstruction, Reg, BR_DISP_MAX, BR_DISP_MIN, LIT_MAX, LIT_MIN,
};
pub use opcode::{BranchCond, InvalidOpcode, Opcode};
pub use program::Program;
pub use token_kind::TokenKind;
