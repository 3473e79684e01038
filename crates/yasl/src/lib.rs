//! YASL - Yet Another Scripting Language.
//!
//! Source compiles in a single pass to a flat bytecode artifact, which runs
//! on a small reference-counted virtual machine.
//!
//! # Example
//!
//! ```
//! let out = yasl::run_with_output("echo 1 + 2;", Vec::new()).unwrap();
//! assert_eq!(String::from_utf8(out).unwrap(), "3\n");
//! ```

use std::io::Write;

use thiserror::Error;

pub use yasl_bytecode as bytecode;
pub use yasl_compiler as compiler;
pub use yasl_lexer as lexer;
pub use yasl_parser as parser;
pub use yasl_vm as vm;

pub use yasl_bytecode::{Artifact, ArtifactError, Op};
pub use yasl_compiler::{CompileError, CompileErrors, Compiler};
pub use yasl_lexer::{Lexer, LexerError, Position, Token, TokenKind};
pub use yasl_parser::{parse, Expr, Parser, ParserError, Program, Stmt};
pub use yasl_vm::{Value, VMConfig, VMError, VM};

/// Error from any stage of running a program.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Compile(#[from] CompileErrors),

    #[error("{0}")]
    Runtime(#[from] VMError),

    #[error("invalid artifact: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Compile source code to an artifact.
pub fn compile(source: &str) -> Result<Artifact, Error> {
    Ok(yasl_compiler::compile(source)?)
}

/// Compile and run source code, printing to standard output.
pub fn run(source: &str) -> Result<(), Error> {
    let artifact = compile(source)?;
    VM::new(VMConfig::default()).run(&artifact)?;
    Ok(())
}

/// Compile and run source code, printing to `out`, and return the writer.
pub fn run_with_output<W: Write>(source: &str, out: W) -> Result<W, Error> {
    let artifact = compile(source)?;
    run_artifact(&artifact, out)
}

/// Run an already compiled artifact, printing to `out`.
pub fn run_artifact<W: Write>(artifact: &Artifact, out: W) -> Result<W, Error> {
    let mut vm = VM::with_output(VMConfig::default(), out);
    vm.run(artifact)?;
    Ok(vm.into_output())
}

/// Load an artifact previously written with [`Artifact::as_bytes`].
pub fn load(bytes: Vec<u8>) -> Result<Artifact, Error> {
    Ok(Artifact::from_bytes(bytes)?)
}
