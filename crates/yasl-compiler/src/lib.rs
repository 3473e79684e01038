//! YASL compiler - single-pass lowering of the AST to bytecode.
//!
//! Names resolve through [`Env`] scope chains; the result is an
//! [`Artifact`](yasl_bytecode::Artifact) ready for the virtual machine.

pub mod compiler;
pub mod env;

pub use compiler::{compile, CompileError, CompileErrors, Compiler};
pub use env::{AlreadyDeclared, Binding, Env};
