//! Compile-time error implementation.

use thiserror::Error;

/// Errors produced while compiling a schema to a validation program.
///
/// Compile-time errors are fatal: no partial program is produced. Run-time
/// validation failures are not errors at this level; they surface as
/// [`weir_asm::ErrorCode`] values from the VM.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The schema document is structurally malformed.
    #[error("malformed schema: {0}")]
    Schema(String),
    /// A pattern could not be compiled to a DFA.
    ///
    /// The core consumes a DFA interface; only patterns expressible
    /// without a regex engine (plain literals) compile in-tree.
    #[error("cannot compile pattern to a DFA: {pattern:?}")]
    BadRegexp {
        /// The offending pattern source.
        pattern: String,
    },
    /// The schema uses a keyword the compiler does not support.
    #[error("unsupported schema construct: {0}")]
    Unsupported(&'static str),
    /// A bit vector outgrew the single 64-bit word the `BAND` encoding
    /// supports.
    #[error("bit vector needs {nbits} bits, limit is 64")]
    BitvecTooWide {
        /// Bits the vector would need.
        nbits: usize,
    },
    /// A branch displacement fell outside the encodable range.
    #[error("branch displacement {disp} exceeds the encodable range")]
    BranchRange {
        /// The displacement that failed to encode.
        disp: i64,
    },
    /// A compiler-internal invariant was violated.
    #[error("internal compiler error: {0}")]
    Internal(&'static str),
}
