//! Token definitions for the YASL lexer.

use std::fmt;

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Special
    Illegal,
    Eof,

    // Literals
    Ident,
    Int,
    Float,
    String,

    // Assignment
    Assign,
    ColonAssign,
    /// Compound assignment; the literal holds the operator, e.g. `+=`.
    OpAssign,

    // Arithmetic
    Plus,
    Minus,
    Asterisk,
    Slash,
    DoubleSlash,
    Mod,
    Pow,
    Tilde,

    // Bitwise
    Ampersand,
    AmpCaret,
    Pipe,
    Caret,
    LtLt,
    GtGt,

    // Comparison and logic
    Bang,
    Eq,
    Identical,
    NotEq,
    NotIdentical,
    Lt,
    Gt,
    LtEquals,
    GtEquals,
    Nullish,
    And,
    Or,
    Question,
    Colon,

    // Arrows
    LeftArrow,
    RightArrow,

    // Delimiters
    Comma,
    Semicolon,
    Period,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    // Keywords
    Let,
    Const,
    Fn,
    Return,
    If,
    Elseif,
    Else,
    While,
    For,
    Break,
    Continue,
    Echo,
    True,
    False,
    Undef,
    Len,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Illegal => "ILLEGAL",
            TokenKind::Eof => "EOF",
            TokenKind::Ident => "IDENT",
            TokenKind::Int => "INT",
            TokenKind::Float => "FLOAT",
            TokenKind::String => "STRING",
            TokenKind::Assign => "=",
            TokenKind::ColonAssign => ":=",
            TokenKind::OpAssign => "OP=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Asterisk => "*",
            TokenKind::Slash => "/",
            TokenKind::DoubleSlash => "//",
            TokenKind::Mod => "%",
            TokenKind::Pow => "**",
            TokenKind::Tilde => "~",
            TokenKind::Ampersand => "&",
            TokenKind::AmpCaret => "&^",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::LtLt => "<<",
            TokenKind::GtGt => ">>",
            TokenKind::Bang => "!",
            TokenKind::Eq => "==",
            TokenKind::Identical => "===",
            TokenKind::NotEq => "!=",
            TokenKind::NotIdentical => "!==",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEquals => "<=",
            TokenKind::GtEquals => ">=",
            TokenKind::Nullish => "??",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::LeftArrow => "<-",
            TokenKind::RightArrow => "->",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Period => ".",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Let => "let",
            TokenKind::Const => "const",
            TokenKind::Fn => "fn",
            TokenKind::Return => "return",
            TokenKind::If => "if",
            TokenKind::Elseif => "elseif",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Echo => "echo",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Undef => "undef",
            TokenKind::Len => "len",
        };
        write!(f, "{}", s)
    }
}

/// Look up an identifier to see if it's a keyword.
///
/// `nan` and `inf` are float literals rather than keywords.
pub fn lookup_identifier(ident: &str) -> TokenKind {
    match ident {
        "let" => TokenKind::Let,
        "const" => TokenKind::Const,
        "fn" => TokenKind::Fn,
        "return" => TokenKind::Return,
        "if" => TokenKind::If,
        "elseif" => TokenKind::Elseif,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "echo" => TokenKind::Echo,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "undef" => TokenKind::Undef,
        "len" => TokenKind::Len,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "nan" | "inf" => TokenKind::Float,
        _ => TokenKind::Ident,
    }
}

/// Position in source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Character offset within the source.
    pub char: usize,
    /// 0-indexed line number.
    pub line: usize,
    /// 0-indexed column number.
    pub column: usize,
}

impl Position {
    pub fn new(char: usize, line: usize, column: usize) -> Self {
        Self { char, line, column }
    }

    /// Returns the 1-indexed line number.
    pub fn line_number(&self) -> usize {
        self.line + 1
    }

    /// Returns the 1-indexed column number.
    pub fn column_number(&self) -> usize {
        self.column + 1
    }
}

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text, or the decoded contents for string literals.
    pub literal: String,
    pub start: Position,
}

impl Token {
    pub fn new(kind: TokenKind, literal: String, start: Position) -> Self {
        Self {
            kind,
            literal,
            start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_identifier() {
        assert_eq!(lookup_identifier("let"), TokenKind::Let);
        assert_eq!(lookup_identifier("elseif"), TokenKind::Elseif);
        assert_eq!(lookup_identifier("and"), TokenKind::And);
        assert_eq!(lookup_identifier("nan"), TokenKind::Float);
        assert_eq!(lookup_identifier("echoes"), TokenKind::Ident);
    }

    #[test]
    fn test_position() {
        let pos = Position::new(10, 1, 5);
        assert_eq!(pos.line_number(), 2);
        assert_eq!(pos.column_number(), 6);
    }
}
