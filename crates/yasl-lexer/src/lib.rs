//! YASL lexer - tokenization for the YASL scripting language.
//!
//! # Example
//!
//! ```
//! use yasl_lexer::{Lexer, TokenKind};
//!
//! let mut lexer = Lexer::new("x := 42;");
//! let token = lexer.next_token().unwrap();
//! assert_eq!(token.kind, TokenKind::Ident);
//! ```

pub mod lexer;
pub mod token;

pub use lexer::{tokenize, Lexer, LexerError};
pub use token::{lookup_identifier, Position, Token, TokenKind};
