//! JSON Schema to bytecode compiler and streaming validation VM.
//!
//! Weir validates JSON documents against JSON Schema (draft-04/06) by
//! compiling a schema into a bytecode program executed on a streaming
//! virtual machine. Compilation is a pipeline of pure passes:
//!
//! ```text
//! schema → cnode → simplify → canonify → translate → linearize → assemble
//! ```
//!
//! The resulting [`Program`] is immutable and shareable; a [`Validator`]
//! streams document bytes through it with `more`/`close` and reports
//! `Valid`, `Invalid(code)` or `More`.
//!
//! ```
//! use weir_vm::{compile_value, validate};
//!
//! let schema = serde_json::json!({"type": "integer"});
//! let prog = compile_value(&schema).unwrap();
//!
//! assert!(validate(&prog, b"110").is_ok());
//! assert!(validate(&prog, b"0.5").is_err());
//! ```

#![warn(missing_docs)]

pub mod asm;
pub mod cnode;
mod error;
pub mod ir;
pub mod matcher;
pub mod schema;
pub mod token;
mod validator;
pub mod vm;

pub use error::CompileError;
pub use schema::Schema;
pub use validator::{validate, Outcome, State, Validator};
pub use weir_asm::{ErrorCode, Program};

/// Commonly used types.
pub mod prelude {
    pub use crate::schema::Schema;
    pub use crate::validator::{validate, Outcome, State, Validator};
    pub use crate::{compile, compile_value, CompileError};
    pub use weir_asm::{ErrorCode, Program};
}

/// Compile a schema into a validation program.
pub fn compile(schema: &Schema) -> Result<Program, CompileError> {
    let span = tracing::debug_span!("compile");
    let _enter = span.enter();

    let node = cnode::from_schema(schema)?;
    let node = cnode::simplify(node);
    let node = cnode::canonify(node)?;

    let mut ir = ir::translate(&node)?;
    ir::linearize(&mut ir)?;

    asm::assemble(&ir)
}

/// Compile a schema given as a JSON document.
pub fn compile_value(doc: &serde_json::Value) -> Result<Program, CompileError> {
    compile(&Schema::from_value(doc)?)
}
