//! Operator precedence levels for Pratt parsing.

use yasl_lexer::TokenKind;

/// Precedence levels (higher = tighter binding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Precedence {
    Lowest = 1,
    Assign = 2,   // = += -= ...
    Ternary = 3,  // ?: ??
    Or = 4,       // or ||
    And = 5,      // and &&
    BitOr = 6,    // |
    BitXor = 7,   // ^
    BitAnd = 8,   // & &^
    Equals = 9,   // == != === !==
    Compare = 10, // < > <= >=
    Concat = 11,  // ~
    Shift = 12,   // << >>
    Sum = 13,     // + -
    Product = 14, // * / // %
    Prefix = 15,  // -x !x ^x len x
    Power = 16,   // ** (right-associative)
    Call = 17,    // f() x[i] x.y
}

impl Precedence {
    /// Get the precedence for a token kind in infix position.
    pub fn from_token(kind: TokenKind) -> Self {
        match kind {
            TokenKind::Assign | TokenKind::OpAssign => Precedence::Assign,
            TokenKind::Question | TokenKind::Nullish => Precedence::Ternary,
            TokenKind::Or => Precedence::Or,
            TokenKind::And => Precedence::And,
            TokenKind::Pipe => Precedence::BitOr,
            TokenKind::Caret => Precedence::BitXor,
            TokenKind::Ampersand | TokenKind::AmpCaret => Precedence::BitAnd,
            TokenKind::Eq | TokenKind::NotEq | TokenKind::Identical | TokenKind::NotIdentical => {
                Precedence::Equals
            }
            TokenKind::Lt
            | TokenKind::LtEquals
            | TokenKind::Gt
            | TokenKind::GtEquals
            | TokenKind::LeftArrow => Precedence::Compare,
            TokenKind::Tilde => Precedence::Concat,
            TokenKind::LtLt | TokenKind::GtGt => Precedence::Shift,
            TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
            TokenKind::Asterisk | TokenKind::Slash | TokenKind::DoubleSlash | TokenKind::Mod => {
                Precedence::Product
            }
            TokenKind::Pow => Precedence::Power,
            TokenKind::LParen | TokenKind::LBracket | TokenKind::Period => Precedence::Call,
            _ => Precedence::Lowest,
        }
    }
}
