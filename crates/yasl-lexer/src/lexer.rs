//! Lexer for the YASL scripting language.

use crate::token::{lookup_identifier, Position, Token, TokenKind};
use thiserror::Error;

/// Errors that can occur during lexing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexerError {
    #[error("Invalid number literal: {literal} at line {line}, column {column}")]
    InvalidNumber {
        literal: String,
        line: usize,
        column: usize,
    },

    #[error("Unterminated string literal at line {line}, column {column}")]
    UnterminatedString { line: usize, column: usize },

    #[error("Unterminated comment at line {line}, column {column}")]
    UnterminatedComment { line: usize, column: usize },

    #[error("Invalid escape sequence: \\{ch} at line {line}, column {column}")]
    InvalidEscape {
        ch: char,
        line: usize,
        column: usize,
    },

    #[error("Invalid hex escape sequence at line {line}, column {column}")]
    InvalidHexEscape { line: usize, column: usize },
}

/// Lexer tokenizes YASL source code.
///
/// Newlines are plain whitespace; statements are separated by `;`.
pub struct Lexer {
    chars: Vec<char>,
    position: usize,
    ch: char,
    line: usize,
    column: usize,
    token_start: Position,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let ch = chars.first().copied().unwrap_or('\0');
        Self {
            chars,
            position: 0,
            ch,
            line: 0,
            column: 0,
            token_start: Position::default(),
        }
    }

    fn current_position(&self) -> Position {
        Position::new(self.position, self.line, self.column)
    }

    /// Advance one character, tracking lines.
    fn read_char(&mut self) {
        if self.ch == '\n' {
            self.line += 1;
            self.column = 0;
        } else if self.position < self.chars.len() {
            self.column += 1;
        }
        if self.position < self.chars.len() {
            self.position += 1;
        }
        self.ch = self.chars.get(self.position).copied().unwrap_or('\0');
    }

    fn peek_char(&self) -> char {
        self.peek_char_n(1)
    }

    fn peek_char_n(&self, n: usize) -> char {
        self.chars.get(self.position + n).copied().unwrap_or('\0')
    }

    fn at_end(&self) -> bool {
        self.position >= self.chars.len()
    }

    /// Skip whitespace and comments.
    fn skip_trivia(&mut self) -> Result<(), LexerError> {
        loop {
            while self.ch.is_whitespace() {
                self.read_char();
            }
            if self.ch == '#' {
                while self.ch != '\n' && !self.at_end() {
                    self.read_char();
                }
            } else if self.ch == '/' && self.peek_char() == '*' {
                let start = self.current_position();
                self.read_char();
                self.read_char();
                while !(self.ch == '*' && self.peek_char() == '/') {
                    if self.at_end() {
                        return Err(LexerError::UnterminatedComment {
                            line: start.line_number(),
                            column: start.column_number(),
                        });
                    }
                    self.read_char();
                }
                self.read_char();
                self.read_char();
            } else {
                return Ok(());
            }
        }
    }

    fn make_token(&self, kind: TokenKind, literal: String) -> Token {
        Token::new(kind, literal, self.token_start)
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_trivia()?;
        self.token_start = self.current_position();

        if self.at_end() {
            return Ok(self.make_token(TokenKind::Eof, String::new()));
        }

        if self.ch == '"' || self.ch == '\'' {
            return self.read_string(self.ch);
        }

        if self.ch.is_ascii_digit() {
            return self.read_number();
        }

        if is_letter(self.ch) {
            return Ok(self.read_identifier());
        }

        if let Some(tok) = self.read_operator() {
            return Ok(tok);
        }

        let ch = self.ch;
        self.read_char();
        Ok(self.make_token(TokenKind::Illegal, ch.to_string()))
    }

    fn read_identifier(&mut self) -> Token {
        let start = self.position;
        while is_letter(self.ch) || self.ch.is_ascii_digit() {
            self.read_char();
        }
        let literal: String = self.chars[start..self.position].iter().collect();
        let kind = lookup_identifier(&literal);
        self.make_token(kind, literal)
    }

    /// Read a number literal (int, float, hex, binary, octal).
    fn read_number(&mut self) -> Result<Token, LexerError> {
        let start = self.position;

        if self.ch == '0' {
            let radix = match self.peek_char().to_ascii_lowercase() {
                'x' => Some(16),
                'b' => Some(2),
                'o' => Some(8),
                _ => None,
            };
            if let Some(radix) = radix {
                self.read_char(); // 0
                self.read_char(); // x, b or o
                while self.ch.is_digit(radix) || self.ch == '_' {
                    self.read_char();
                }
                let literal: String = self.chars[start..self.position].iter().collect();
                if literal.len() == 2 {
                    return Err(self.invalid_number(literal));
                }
                self.check_trailing_alphanumeric(&literal)?;
                return Ok(self.make_token(TokenKind::Int, literal));
            }
        }

        while self.ch.is_ascii_digit() || self.ch == '_' {
            self.read_char();
        }

        let mut is_float = false;

        if self.ch == '.' && self.peek_char().is_ascii_digit() {
            is_float = true;
            self.read_char();
            while self.ch.is_ascii_digit() || self.ch == '_' {
                self.read_char();
            }
        }

        if self.ch == 'e' || self.ch == 'E' {
            let next = self.peek_char();
            let signed_digit =
                (next == '+' || next == '-') && self.peek_char_n(2).is_ascii_digit();
            if next.is_ascii_digit() || signed_digit {
                is_float = true;
                self.read_char();
                if self.ch == '+' || self.ch == '-' {
                    self.read_char();
                }
                while self.ch.is_ascii_digit() {
                    self.read_char();
                }
            }
        }

        let literal: String = self.chars[start..self.position].iter().collect();
        self.check_trailing_alphanumeric(&literal)?;
        let kind = if is_float {
            TokenKind::Float
        } else {
            TokenKind::Int
        };
        Ok(self.make_token(kind, literal))
    }

    fn invalid_number(&self, literal: String) -> LexerError {
        LexerError::InvalidNumber {
            literal,
            line: self.token_start.line_number(),
            column: self.token_start.column_number(),
        }
    }

    fn check_trailing_alphanumeric(&self, literal: &str) -> Result<(), LexerError> {
        if is_letter(self.ch) {
            return Err(self.invalid_number(format!("{}{}", literal, self.ch)));
        }
        Ok(())
    }

    /// Read a quoted string literal. Strings may span lines.
    fn read_string(&mut self, quote: char) -> Result<Token, LexerError> {
        let mut chars = String::new();
        self.read_char(); // opening quote

        while self.ch != quote {
            if self.at_end() {
                return Err(LexerError::UnterminatedString {
                    line: self.token_start.line_number(),
                    column: self.token_start.column_number(),
                });
            }
            if self.ch == '\\' {
                self.read_char();
                chars.push(self.read_escape_sequence()?);
            } else {
                chars.push(self.ch);
                self.read_char();
            }
        }

        self.read_char(); // closing quote
        Ok(self.make_token(TokenKind::String, chars))
    }

    fn read_escape_sequence(&mut self) -> Result<char, LexerError> {
        let ch = self.ch;
        let position = self.current_position();
        self.read_char();

        match ch {
            'n' => Ok('\n'),
            'r' => Ok('\r'),
            't' => Ok('\t'),
            '0' => Ok('\0'),
            '\\' => Ok('\\'),
            '"' => Ok('"'),
            '\'' => Ok('\''),
            'x' => self.read_hex_escape(),
            _ => Err(LexerError::InvalidEscape {
                ch,
                line: position.line_number(),
                column: position.column_number(),
            }),
        }
    }

    /// Read the two digits of a `\xHH` escape.
    fn read_hex_escape(&mut self) -> Result<char, LexerError> {
        let mut value = 0u32;
        for _ in 0..2 {
            let Some(digit) = self.ch.to_digit(16) else {
                return Err(LexerError::InvalidHexEscape {
                    line: self.current_position().line_number(),
                    column: self.current_position().column_number(),
                });
            };
            value = value * 16 + digit;
            self.read_char();
        }
        Ok(char::from_u32(value).unwrap_or('\u{FFFD}'))
    }

    /// Read an operator or punctuation token, longest match first.
    fn read_operator(&mut self) -> Option<Token> {
        let ch = self.ch;
        let next = self.peek_char();
        let third = self.peek_char_n(2);

        let three_char = match (ch, next, third) {
            ('=', '=', '=') => Some(TokenKind::Identical),
            ('!', '=', '=') => Some(TokenKind::NotIdentical),
            ('*', '*', '=')
            | ('/', '/', '=')
            | ('<', '<', '=')
            | ('>', '>', '=')
            | ('&', '^', '=')
            | ('?', '?', '=') => Some(TokenKind::OpAssign),
            _ => None,
        };
        if let Some(kind) = three_char {
            return Some(self.consume_operator(kind, 3));
        }

        let two_char = match (ch, next) {
            ('=', '=') => Some(TokenKind::Eq),
            ('!', '=') => Some(TokenKind::NotEq),
            ('<', '=') => Some(TokenKind::LtEquals),
            ('>', '=') => Some(TokenKind::GtEquals),
            ('<', '<') => Some(TokenKind::LtLt),
            ('>', '>') => Some(TokenKind::GtGt),
            ('<', '-') => Some(TokenKind::LeftArrow),
            ('-', '>') => Some(TokenKind::RightArrow),
            ('*', '*') => Some(TokenKind::Pow),
            ('/', '/') => Some(TokenKind::DoubleSlash),
            ('&', '^') => Some(TokenKind::AmpCaret),
            ('&', '&') => Some(TokenKind::And),
            ('|', '|') => Some(TokenKind::Or),
            ('?', '?') => Some(TokenKind::Nullish),
            (':', '=') => Some(TokenKind::ColonAssign),
            ('+' | '-' | '*' | '/' | '%' | '~' | '&' | '|' | '^', '=') => {
                Some(TokenKind::OpAssign)
            }
            _ => None,
        };
        if let Some(kind) = two_char {
            return Some(self.consume_operator(kind, 2));
        }

        let single_char = match ch {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Asterisk,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Mod,
            '~' => TokenKind::Tilde,
            '=' => TokenKind::Assign,
            '!' => TokenKind::Bang,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '&' => TokenKind::Ampersand,
            '|' => TokenKind::Pipe,
            '^' => TokenKind::Caret,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Period,
            '?' => TokenKind::Question,
            _ => return None,
        };
        Some(self.consume_operator(single_char, 1))
    }

    fn consume_operator(&mut self, kind: TokenKind, len: usize) -> Token {
        let literal: String = self.chars[self.position..self.position + len]
            .iter()
            .collect();
        for _ in 0..len {
            self.read_char();
        }
        self.make_token(kind, literal)
    }
}

fn is_letter(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

/// Tokenize an input string into a vector of tokens ending with `Eof`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexerError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token()?;
        let is_eof = tok.kind == TokenKind::Eof;
        tokens.push(tok);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty_input() {
        let tokens = tokenize("").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_identifiers_and_keywords() {
        assert_eq!(
            kinds("let x := echo_1 fn elseif len"),
            vec![
                TokenKind::Let,
                TokenKind::Ident,
                TokenKind::ColonAssign,
                TokenKind::Ident,
                TokenKind::Fn,
                TokenKind::Elseif,
                TokenKind::Len,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_integers() {
        let tokens = tokenize("42 0x1F 0b11 0o17 1_000").unwrap();
        let literals: Vec<&str> = tokens.iter().map(|t| t.literal.as_str()).collect();
        assert_eq!(literals, vec!["42", "0x1F", "0b11", "0o17", "1_000", ""]);
        assert!(tokens[..5].iter().all(|t| t.kind == TokenKind::Int));
    }

    #[test]
    fn test_floats() {
        let tokens = tokenize("3.14 1e5 2.5E-3 nan inf").unwrap();
        assert!(tokens[..5].iter().all(|t| t.kind == TokenKind::Float));
        assert_eq!(tokens[2].literal, "2.5E-3");
        assert_eq!(tokens[3].literal, "nan");
    }

    #[test]
    fn test_method_call_on_int_is_not_float() {
        assert_eq!(
            kinds("5.tostr()"),
            vec![
                TokenKind::Int,
                TokenKind::Period,
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_invalid_number() {
        assert!(matches!(
            tokenize("12abc"),
            Err(LexerError::InvalidNumber { .. })
        ));
        assert!(matches!(tokenize("0x"), Err(LexerError::InvalidNumber { .. })));
    }

    #[test]
    fn test_strings() {
        let tokens = tokenize(r#"'YASL' "a\tb\x41" 'it\'s'"#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].literal, "YASL");
        assert_eq!(tokens[1].literal, "a\tbA");
        assert_eq!(tokens[2].literal, "it's");
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(
            tokenize("x := 'abc"),
            Err(LexerError::UnterminatedString { line: 1, column: 6 })
        );
    }

    #[test]
    fn test_invalid_escape() {
        assert!(matches!(
            tokenize(r"'\q'"),
            Err(LexerError::InvalidEscape { ch: 'q', .. })
        ));
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("=== !== ** // &^ ?? <- -> << >> ~"),
            vec![
                TokenKind::Identical,
                TokenKind::NotIdentical,
                TokenKind::Pow,
                TokenKind::DoubleSlash,
                TokenKind::AmpCaret,
                TokenKind::Nullish,
                TokenKind::LeftArrow,
                TokenKind::RightArrow,
                TokenKind::LtLt,
                TokenKind::GtGt,
                TokenKind::Tilde,
                TokenKind::Eof,
            ]
        );
        assert_eq!(kinds("&& ||")[..2], [TokenKind::And, TokenKind::Or]);
    }

    #[test]
    fn test_compound_assignment() {
        let tokens = tokenize("+= **= //= &^= ??= ~=").unwrap();
        assert!(tokens[..6].iter().all(|t| t.kind == TokenKind::OpAssign));
        let literals: Vec<&str> = tokens[..6].iter().map(|t| t.literal.as_str()).collect();
        assert_eq!(literals, vec!["+=", "**=", "//=", "&^=", "??=", "~="]);
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("# comment\necho /* block\ncomment */ 1"),
            vec![TokenKind::Echo, TokenKind::Int, TokenKind::Eof]
        );
        assert!(matches!(
            tokenize("/* open"),
            Err(LexerError::UnterminatedComment { line: 1, column: 1 })
        ));
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("x\n  y").unwrap();
        assert_eq!(tokens[0].start.line_number(), 1);
        assert_eq!(tokens[1].start.line_number(), 2);
        assert_eq!(tokens[1].start.column_number(), 3);
    }
}
