//! YASL parser - AST construction for the YASL scripting language.

pub mod ast;
pub mod parser;
pub mod precedence;

pub use ast::*;
pub use parser::{parse, Parser, ParserError};
pub use precedence::Precedence;
