//! Pratt parser for YASL.

use crate::ast::*;
use crate::precedence::Precedence;
use thiserror::Error;
use yasl_lexer::{Lexer, LexerError, Position, Token, TokenKind};

/// Errors that can occur during parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParserError {
    #[error("{message} at line {line}, column {column}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("lexer error: {0}")]
    Lexer(#[from] LexerError),
}

impl ParserError {
    fn new(message: impl Into<String>, pos: Position) -> Self {
        Self::Syntax {
            message: message.into(),
            line: pos.line_number(),
            column: pos.column_number(),
        }
    }

    /// 1-indexed line the error was reported at.
    pub fn line(&self) -> usize {
        match self {
            ParserError::Syntax { line, .. } => *line,
            ParserError::Lexer(
                LexerError::InvalidNumber { line, .. }
                | LexerError::UnterminatedString { line, .. }
                | LexerError::UnterminatedComment { line, .. }
                | LexerError::InvalidEscape { line, .. }
                | LexerError::InvalidHexEscape { line, .. },
            ) => *line,
        }
    }
}

/// Decimal digits of `i64::MIN` without its sign.
const I64_MIN_MAGNITUDE: &str = "9223372036854775808";

type PrefixParseFn = fn(&mut Parser) -> Option<Expr>;
type InfixParseFn = fn(&mut Parser, Expr) -> Option<Expr>;

/// Pratt parser for YASL source code.
pub struct Parser {
    lexer: Lexer,
    cur_token: Token,
    peek_token: Token,
    errors: Vec<ParserError>,
    lexer_failed: bool,
    max_depth: usize,
    depth: usize,
}

impl Parser {
    pub fn new(lexer: Lexer) -> Self {
        let eof = Token::new(TokenKind::Eof, String::new(), Position::default());
        let mut parser = Self {
            lexer,
            cur_token: eof.clone(),
            peek_token: eof,
            errors: Vec::new(),
            lexer_failed: false,
            max_depth: 500,
            depth: 0,
        };
        parser.next_token();
        parser.next_token();
        parser
    }

    /// Advance one token. A lexer error is recorded and ends the input.
    fn next_token(&mut self) {
        let next = if self.lexer_failed {
            Token::new(TokenKind::Eof, String::new(), self.peek_token.start)
        } else {
            match self.lexer.next_token() {
                Ok(tok) => tok,
                Err(err) => {
                    self.errors.push(err.into());
                    self.lexer_failed = true;
                    Token::new(TokenKind::Eof, String::new(), self.peek_token.start)
                }
            }
        };
        self.cur_token = std::mem::replace(&mut self.peek_token, next);
    }

    fn cur_token_is(&self, kind: TokenKind) -> bool {
        self.cur_token.kind == kind
    }

    fn peek_token_is(&self, kind: TokenKind) -> bool {
        self.peek_token.kind == kind
    }

    /// Consume the current token if it has the given kind, else record an error.
    fn expect(&mut self, kind: TokenKind) -> Option<Position> {
        if self.cur_token_is(kind) {
            let pos = self.cur_token.start;
            self.next_token();
            Some(pos)
        } else {
            self.error(format!(
                "expected '{}', got '{}'",
                kind,
                self.describe_cur()
            ));
            None
        }
    }

    fn expect_ident(&mut self) -> Option<Ident> {
        if !self.cur_token_is(TokenKind::Ident) {
            self.error(format!("expected identifier, got '{}'", self.describe_cur()));
            return None;
        }
        let ident = Ident {
            position: self.cur_token.start,
            name: self.cur_token.literal.clone(),
        };
        self.next_token();
        Some(ident)
    }

    fn describe_cur(&self) -> String {
        match self.cur_token.kind {
            TokenKind::Eof => "EOF".to_string(),
            _ if !self.cur_token.literal.is_empty() => self.cur_token.literal.clone(),
            kind => kind.to_string(),
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors
            .push(ParserError::new(message, self.cur_token.start));
    }

    fn cur_precedence(&self) -> Precedence {
        Precedence::from_token(self.cur_token.kind)
    }

    /// Skip to the next statement boundary after an error.
    fn synchronize(&mut self) {
        while !self.cur_token_is(TokenKind::Eof) {
            match self.cur_token.kind {
                TokenKind::Semicolon => {
                    self.next_token();
                    return;
                }
                TokenKind::RBrace
                | TokenKind::Let
                | TokenKind::Const
                | TokenKind::Fn
                | TokenKind::Echo
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return => return,
                _ => self.next_token(),
            }
        }
    }

    /// Parse the entire program, returning the first error if any.
    pub fn parse(&mut self) -> Result<Program, ParserError> {
        let stmts = self.parse_statements(TokenKind::Eof);
        if let Some(err) = self.errors.first() {
            return Err(err.clone());
        }
        Ok(Program { stmts })
    }

    /// Get all parse errors.
    pub fn errors(&self) -> &[ParserError] {
        &self.errors
    }

    // =========================================================================
    // Statement Parsing
    // =========================================================================

    /// Parse statements until `end` (not consumed).
    fn parse_statements(&mut self, end: TokenKind) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while !self.cur_token_is(end) && !self.cur_token_is(TokenKind::Eof) {
            if self.cur_token_is(TokenKind::Semicolon) {
                self.next_token();
                continue;
            }
            let errors_before = self.errors.len();
            match self.parse_statement() {
                Some(stmt) => {
                    let ends_in_block = matches!(
                        stmt,
                        Stmt::Fn(_) | Stmt::Block(_) | Stmt::If(_) | Stmt::While(_) | Stmt::ForIter(_)
                    );
                    stmts.push(stmt);
                    if !ends_in_block {
                        self.expect_terminator();
                    }
                }
                None => {
                    if self.errors.len() == errors_before {
                        self.error("invalid statement");
                    }
                    let before = self.cur_token.start;
                    self.synchronize();
                    if self.cur_token.start == before && !self.cur_token_is(TokenKind::Eof) {
                        self.next_token();
                    }
                }
            }
        }
        stmts
    }

    /// A statement ends at `;`, before `}` or at end of input.
    fn expect_terminator(&mut self) {
        match self.cur_token.kind {
            TokenKind::Semicolon => self.next_token(),
            TokenKind::RBrace | TokenKind::Eof => {}
            _ => {
                self.error(format!("expected ';', got '{}'", self.describe_cur()));
                self.synchronize();
            }
        }
    }

    fn parse_statement(&mut self) -> Option<Stmt> {
        match self.cur_token.kind {
            TokenKind::Let | TokenKind::Const => self.parse_let(),
            TokenKind::Ident if self.peek_token_is(TokenKind::ColonAssign) => {
                self.parse_colon_let()
            }
            TokenKind::Fn => self.parse_fn(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Echo => self.parse_echo(),
            TokenKind::If => self.parse_if().map(|s| Stmt::If(Box::new(s))),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::LBrace => self.parse_block().map(Stmt::Block),
            TokenKind::Break => {
                let pos = self.cur_token.start;
                self.next_token();
                Some(Stmt::Break(pos))
            }
            TokenKind::Continue => {
                let pos = self.cur_token.start;
                self.next_token();
                Some(Stmt::Continue(pos))
            }
            _ => self.parse_expression(Precedence::Lowest).map(Stmt::Expr),
        }
    }

    /// `let x = e`, `let x`, `const x = e`.
    fn parse_let(&mut self) -> Option<Stmt> {
        let let_pos = self.cur_token.start;
        let is_const = self.cur_token_is(TokenKind::Const);
        self.next_token();
        self.parse_let_rest(let_pos, is_const)
    }

    /// The part of a declaration after `let`/`const`.
    fn parse_let_rest(&mut self, let_pos: Position, is_const: bool) -> Option<Stmt> {
        let name = self.expect_ident()?;
        let value = if self.cur_token_is(TokenKind::Assign) {
            self.next_token();
            Some(self.parse_expression(Precedence::Lowest)?)
        } else if is_const {
            self.error("const declaration requires a value");
            return None;
        } else {
            None
        };
        Some(Stmt::Let(LetStmt {
            let_pos,
            name,
            value,
            is_const,
        }))
    }

    /// `x := e`, shorthand for `let x = e`.
    fn parse_colon_let(&mut self) -> Option<Stmt> {
        let let_pos = self.cur_token.start;
        let name = self.expect_ident()?;
        self.expect(TokenKind::ColonAssign)?;
        let value = self.parse_expression(Precedence::Lowest)?;
        Some(Stmt::Let(LetStmt {
            let_pos,
            name,
            value: Some(value),
            is_const: false,
        }))
    }

    fn parse_fn(&mut self) -> Option<Stmt> {
        let fn_pos = self.cur_token.start;
        self.next_token();
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.cur_token_is(TokenKind::RParen) {
            params.push(self.expect_ident()?);
            if !self.cur_token_is(TokenKind::Comma) {
                break;
            }
            self.next_token();
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Some(Stmt::Fn(Box::new(FnDecl {
            fn_pos,
            name,
            params,
            body,
        })))
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        let return_pos = self.cur_token.start;
        self.next_token();
        let value = match self.cur_token.kind {
            TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof => None,
            _ => Some(self.parse_expression(Precedence::Lowest)?),
        };
        Some(Stmt::Return(ReturnStmt { return_pos, value }))
    }

    fn parse_echo(&mut self) -> Option<Stmt> {
        let echo_pos = self.cur_token.start;
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;
        Some(Stmt::Echo(EchoStmt { echo_pos, value }))
    }

    /// `if`/`elseif` chain. The current token is `if` or `elseif`.
    fn parse_if(&mut self) -> Option<IfStmt> {
        let if_pos = self.cur_token.start;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;
        let consequence = self.parse_block()?;
        let alternative = match self.cur_token.kind {
            TokenKind::Elseif => Some(Stmt::If(Box::new(self.parse_if()?))),
            TokenKind::Else => {
                self.next_token();
                Some(Stmt::Block(self.parse_block()?))
            }
            _ => None,
        };
        Some(IfStmt {
            if_pos,
            condition,
            consequence,
            alternative,
        })
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let while_pos = self.cur_token.start;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;
        let body = self.parse_block()?;
        Some(Stmt::While(Box::new(WhileStmt {
            while_pos,
            condition,
            body,
            post: None,
        })))
    }

    /// `for let x <- xs {}`, `for x <- xs {}` or `for init; cond; post {}`.
    ///
    /// The C-style form becomes a block holding `init` and a `while` loop.
    fn parse_for(&mut self) -> Option<Stmt> {
        let for_pos = self.cur_token.start;
        self.next_token();

        let init = if self.cur_token_is(TokenKind::Let) && self.peek_token_is(TokenKind::Ident) {
            let let_pos = self.cur_token.start;
            self.next_token();
            if self.peek_token_is(TokenKind::LeftArrow) {
                return self.parse_for_iter(for_pos, true);
            }
            self.parse_let_rest(let_pos, false)?
        } else if self.cur_token_is(TokenKind::Ident) && self.peek_token_is(TokenKind::LeftArrow) {
            return self.parse_for_iter(for_pos, false);
        } else {
            self.parse_statement()?
        };

        self.expect(TokenKind::Semicolon)?;
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(TokenKind::Semicolon)?;
        let post = self.parse_expression(Precedence::Lowest)?;
        let body = self.parse_block()?;

        Some(Stmt::Block(Block {
            lbrace: for_pos,
            stmts: vec![
                init,
                Stmt::While(Box::new(WhileStmt {
                    while_pos: for_pos,
                    condition,
                    body,
                    post: Some(Stmt::Expr(post)),
                })),
            ],
        }))
    }

    fn parse_for_iter(&mut self, for_pos: Position, declare: bool) -> Option<Stmt> {
        let name = self.expect_ident()?;
        self.expect(TokenKind::LeftArrow)?;
        let iterable = self.parse_expression(Precedence::Lowest)?;
        let body = self.parse_block()?;
        Some(Stmt::ForIter(Box::new(ForIterStmt {
            for_pos,
            name,
            declare,
            iterable,
            body,
        })))
    }

    fn parse_block(&mut self) -> Option<Block> {
        let lbrace = self.expect(TokenKind::LBrace)?;
        let stmts = self.parse_statements(TokenKind::RBrace);
        self.expect(TokenKind::RBrace)?;
        Some(Block { lbrace, stmts })
    }

    // =========================================================================
    // Expression Parsing
    // =========================================================================

    pub fn parse_expression(&mut self, precedence: Precedence) -> Option<Expr> {
        self.depth += 1;
        let result = if self.depth > self.max_depth {
            self.error("maximum expression depth exceeded");
            None
        } else {
            match self.get_prefix_fn(self.cur_token.kind) {
                Some(prefix_fn) => {
                    prefix_fn(self).and_then(|left| self.parse_infix_chain(left, precedence))
                }
                None => {
                    self.error(format!("unexpected token '{}'", self.describe_cur()));
                    None
                }
            }
        };
        self.depth -= 1;
        result
    }

    /// Continue the Pratt loop with an already-parsed left operand.
    fn parse_infix_chain(&mut self, mut left: Expr, precedence: Precedence) -> Option<Expr> {
        while !self.cur_token_is(TokenKind::Eof) && precedence < self.cur_precedence() {
            let Some(infix_fn) = self.get_infix_fn(self.cur_token.kind) else {
                break;
            };
            left = infix_fn(self, left)?;
        }
        Some(left)
    }

    fn get_prefix_fn(&self, kind: TokenKind) -> Option<PrefixParseFn> {
        match kind {
            TokenKind::Ident => Some(Parser::parse_ident),
            TokenKind::Int => Some(Parser::parse_int),
            TokenKind::Float => Some(Parser::parse_float),
            TokenKind::String => Some(Parser::parse_string),
            TokenKind::True | TokenKind::False => Some(Parser::parse_bool),
            TokenKind::Undef => Some(Parser::parse_undef),
            TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Bang
            | TokenKind::Caret
            | TokenKind::Len => Some(Parser::parse_prefix),
            TokenKind::LParen => Some(Parser::parse_grouped),
            TokenKind::LBracket => Some(Parser::parse_collection),
            _ => None,
        }
    }

    fn get_infix_fn(&self, kind: TokenKind) -> Option<InfixParseFn> {
        match kind {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Asterisk
            | TokenKind::Slash
            | TokenKind::DoubleSlash
            | TokenKind::Mod
            | TokenKind::Tilde
            | TokenKind::Ampersand
            | TokenKind::AmpCaret
            | TokenKind::Pipe
            | TokenKind::Caret
            | TokenKind::LtLt
            | TokenKind::GtGt
            | TokenKind::Eq
            | TokenKind::NotEq
            | TokenKind::Identical
            | TokenKind::NotIdentical
            | TokenKind::Lt
            | TokenKind::LtEquals
            | TokenKind::Gt
            | TokenKind::GtEquals
            | TokenKind::Pow => Some(Parser::parse_infix),
            TokenKind::And | TokenKind::Or | TokenKind::Nullish => Some(Parser::parse_logical),
            TokenKind::LeftArrow => Some(Parser::parse_less_negated),
            TokenKind::Question => Some(Parser::parse_ternary),
            TokenKind::Assign | TokenKind::OpAssign => Some(Parser::parse_assign),
            TokenKind::LParen => Some(Parser::parse_call),
            TokenKind::LBracket => Some(Parser::parse_index),
            TokenKind::Period => Some(Parser::parse_dot),
            _ => None,
        }
    }

    // =========================================================================
    // Literals
    // =========================================================================

    fn parse_ident(&mut self) -> Option<Expr> {
        self.expect_ident().map(Expr::Ident)
    }

    fn parse_int(&mut self) -> Option<Expr> {
        let position = self.cur_token.start;
        let literal = self.cur_token.literal.clone();
        let digits = literal.replace('_', "");
        let lower = digits.to_ascii_lowercase();
        let value = if let Some(hex) = lower.strip_prefix("0x") {
            u64::from_str_radix(hex, 16).ok().map(|v| v as i64)
        } else if let Some(bin) = lower.strip_prefix("0b") {
            u64::from_str_radix(bin, 2).ok().map(|v| v as i64)
        } else if let Some(oct) = lower.strip_prefix("0o") {
            u64::from_str_radix(oct, 8).ok().map(|v| v as i64)
        } else {
            digits.parse::<i64>().ok()
        };
        let Some(value) = value else {
            self.error(format!("integer literal out of range: {}", literal));
            return None;
        };
        self.next_token();
        Some(Expr::Int(IntLit {
            position,
            literal,
            value,
        }))
    }

    fn parse_float(&mut self) -> Option<Expr> {
        let position = self.cur_token.start;
        let literal = self.cur_token.literal.clone();
        let value = match literal.as_str() {
            "nan" => Some(f64::NAN),
            "inf" => Some(f64::INFINITY),
            _ => literal.replace('_', "").parse::<f64>().ok(),
        };
        let Some(value) = value else {
            self.error(format!("invalid float literal: {}", literal));
            return None;
        };
        self.next_token();
        Some(Expr::Float(FloatLit {
            position,
            literal,
            value,
        }))
    }

    fn parse_string(&mut self) -> Option<Expr> {
        let expr = Expr::String(StringLit {
            position: self.cur_token.start,
            value: self.cur_token.literal.clone(),
        });
        self.next_token();
        Some(expr)
    }

    fn parse_bool(&mut self) -> Option<Expr> {
        let expr = Expr::Bool(BoolLit {
            position: self.cur_token.start,
            value: self.cur_token_is(TokenKind::True),
        });
        self.next_token();
        Some(expr)
    }

    fn parse_undef(&mut self) -> Option<Expr> {
        let position = self.cur_token.start;
        self.next_token();
        Some(Expr::Undef(position))
    }

    fn parse_grouped(&mut self) -> Option<Expr> {
        self.next_token();
        let expr = self.parse_expression(Precedence::Lowest)?;
        self.expect(TokenKind::RParen)?;
        Some(expr)
    }

    /// List or table literal, or a comprehension.
    fn parse_collection(&mut self) -> Option<Expr> {
        let lbrack = self.cur_token.start;
        self.next_token();

        if self.cur_token_is(TokenKind::RBracket) {
            self.next_token();
            return Some(Expr::List(ListLit {
                lbrack,
                items: Vec::new(),
            }));
        }
        if self.cur_token_is(TokenKind::RightArrow) && self.peek_token_is(TokenKind::RBracket) {
            self.next_token();
            self.next_token();
            return Some(Expr::Table(TableLit {
                lbrack,
                entries: Vec::new(),
            }));
        }

        let first = self.parse_expression(Precedence::Lowest)?;

        if self.cur_token_is(TokenKind::RightArrow) {
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            if self.cur_token_is(TokenKind::For) {
                let clause = self.parse_comp_clause()?;
                self.expect(TokenKind::RBracket)?;
                return Some(Expr::TableComp(Box::new(TableComp {
                    lbrack,
                    key: first,
                    value,
                    clause,
                })));
            }
            let mut entries = vec![(first, value)];
            while self.cur_token_is(TokenKind::Comma) {
                self.next_token();
                if self.cur_token_is(TokenKind::RBracket) {
                    break;
                }
                let key = self.parse_expression(Precedence::Lowest)?;
                self.expect(TokenKind::RightArrow)?;
                let value = self.parse_expression(Precedence::Lowest)?;
                entries.push((key, value));
            }
            self.expect(TokenKind::RBracket)?;
            return Some(Expr::Table(TableLit { lbrack, entries }));
        }

        if self.cur_token_is(TokenKind::For) {
            let clause = self.parse_comp_clause()?;
            self.expect(TokenKind::RBracket)?;
            return Some(Expr::ListComp(Box::new(ListComp {
                lbrack,
                element: first,
                clause,
            })));
        }

        let mut items = vec![first];
        while self.cur_token_is(TokenKind::Comma) {
            self.next_token();
            if self.cur_token_is(TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_expression(Precedence::Lowest)?);
        }
        self.expect(TokenKind::RBracket)?;
        Some(Expr::List(ListLit { lbrack, items }))
    }

    /// `for [let] x <- xs [if cond]` inside a comprehension.
    fn parse_comp_clause(&mut self) -> Option<CompClause> {
        self.expect(TokenKind::For)?;
        if self.cur_token_is(TokenKind::Let) {
            self.next_token();
        }
        let name = self.expect_ident()?;
        self.expect(TokenKind::LeftArrow)?;
        let iterable = self.parse_expression(Precedence::Lowest)?;
        let filter = if self.cur_token_is(TokenKind::If) {
            self.next_token();
            Some(self.parse_expression(Precedence::Lowest)?)
        } else {
            None
        };
        Some(CompClause {
            name,
            iterable,
            filter,
        })
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn parse_prefix(&mut self) -> Option<Expr> {
        let op_pos = self.cur_token.start;
        let op = match self.cur_token.kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Caret => UnaryOp::BitNot,
            _ => UnaryOp::Len,
        };
        self.next_token();
        // `i64::MIN` has no positive literal, so fold the sign into it.
        if op == UnaryOp::Neg
            && self.cur_token_is(TokenKind::Int)
            && self.cur_token.literal.replace('_', "") == I64_MIN_MAGNITUDE
            && Precedence::from_token(self.peek_token.kind) <= Precedence::Prefix
        {
            let literal = format!("-{}", self.cur_token.literal);
            self.next_token();
            return Some(Expr::Int(IntLit {
                position: op_pos,
                literal,
                value: i64::MIN,
            }));
        }
        let right = self.parse_expression(Precedence::Prefix)?;
        Some(Expr::Prefix(Box::new(PrefixExpr { op_pos, op, right })))
    }

    fn parse_infix(&mut self, left: Expr) -> Option<Expr> {
        let kind = self.cur_token.kind;
        let precedence = self.cur_precedence();
        let op = match kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Asterisk => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::DoubleSlash => BinaryOp::IntDiv,
            TokenKind::Mod => BinaryOp::Mod,
            TokenKind::Pow => BinaryOp::Pow,
            TokenKind::Tilde => BinaryOp::Concat,
            TokenKind::Ampersand => BinaryOp::BitAnd,
            TokenKind::AmpCaret => BinaryOp::BitAndNot,
            TokenKind::Pipe => BinaryOp::BitOr,
            TokenKind::Caret => BinaryOp::BitXor,
            TokenKind::LtLt => BinaryOp::Shl,
            TokenKind::GtGt => BinaryOp::Shr,
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::NotEq,
            TokenKind::Identical => BinaryOp::Identical,
            TokenKind::NotIdentical => BinaryOp::NotIdentical,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::LtEquals => BinaryOp::LtEq,
            TokenKind::Gt => BinaryOp::Gt,
            _ => BinaryOp::GtEq,
        };
        self.next_token();

        // `**` is right-associative
        let right_precedence = if kind == TokenKind::Pow {
            Precedence::Prefix
        } else {
            precedence
        };
        let right = self.parse_expression(right_precedence)?;
        Some(Expr::Infix(Box::new(InfixExpr { left, op, right })))
    }

    fn parse_logical(&mut self, left: Expr) -> Option<Expr> {
        let kind = self.cur_token.kind;
        let precedence = self.cur_precedence();
        self.next_token();
        let (op, right) = match kind {
            TokenKind::And => (LogicalOp::And, self.parse_expression(precedence)?),
            TokenKind::Or => (LogicalOp::Or, self.parse_expression(precedence)?),
            // `??` is right-associative
            _ => (LogicalOp::Nullish, self.parse_expression(Precedence::Assign)?),
        };
        Some(Expr::Logical(Box::new(LogicalExpr { left, op, right })))
    }

    /// `x <-1` outside of a `for` header reads as `x < -1`.
    fn parse_less_negated(&mut self, left: Expr) -> Option<Expr> {
        let op_pos = self.cur_token.start;
        self.next_token();
        let operand = self.parse_expression(Precedence::Prefix)?;
        let negated = Expr::Prefix(Box::new(PrefixExpr {
            op_pos,
            op: UnaryOp::Neg,
            right: operand,
        }));
        let right = self.parse_infix_chain(negated, Precedence::Compare)?;
        Some(Expr::Infix(Box::new(InfixExpr {
            left,
            op: BinaryOp::Lt,
            right,
        })))
    }

    fn parse_ternary(&mut self, condition: Expr) -> Option<Expr> {
        self.next_token();
        let consequence = self.parse_expression(Precedence::Lowest)?;
        self.expect(TokenKind::Colon)?;
        let alternative = self.parse_expression(Precedence::Assign)?;
        Some(Expr::Ternary(Box::new(TernaryExpr {
            condition,
            consequence,
            alternative,
        })))
    }

    /// `x = e`, `x[k] = e` and compound forms such as `x += e`.
    fn parse_assign(&mut self, target: Expr) -> Option<Expr> {
        let op_literal = self.cur_token.literal.clone();
        let is_compound = self.cur_token_is(TokenKind::OpAssign);
        self.next_token();
        let mut value = self.parse_expression(Precedence::Lowest)?;

        if is_compound {
            let current = target.clone();
            value = if op_literal == "??=" {
                Expr::Logical(Box::new(LogicalExpr {
                    left: current,
                    op: LogicalOp::Nullish,
                    right: value,
                }))
            } else {
                let Some(op) = BinaryOp::from_compound(&op_literal) else {
                    self.error(format!("unknown assignment operator {}", op_literal));
                    return None;
                };
                Expr::Infix(Box::new(InfixExpr {
                    left: current,
                    op,
                    right: value,
                }))
            };
        }

        match target {
            Expr::Ident(name) => Some(Expr::Assign(Box::new(AssignExpr { name, value }))),
            Expr::Index(index) => {
                let IndexExpr { collection, key } = *index;
                Some(Expr::SetIndex(Box::new(SetIndexExpr {
                    collection,
                    key,
                    value,
                })))
            }
            other => {
                self.errors.push(ParserError::new(
                    format!("invalid assignment target: {}", other),
                    other.pos(),
                ));
                None
            }
        }
    }

    // =========================================================================
    // Access Expressions
    // =========================================================================

    fn parse_call_args(&mut self) -> Option<Vec<Expr>> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.cur_token_is(TokenKind::RParen) {
            args.push(self.parse_expression(Precedence::Lowest)?);
            if !self.cur_token_is(TokenKind::Comma) {
                break;
            }
            self.next_token();
        }
        self.expect(TokenKind::RParen)?;
        Some(args)
    }

    fn parse_call(&mut self, function: Expr) -> Option<Expr> {
        let args = self.parse_call_args()?;
        Some(Expr::Call(Box::new(CallExpr { function, args })))
    }

    fn parse_index(&mut self, collection: Expr) -> Option<Expr> {
        self.next_token();
        let key = self.parse_expression(Precedence::Lowest)?;
        self.expect(TokenKind::RBracket)?;
        Some(Expr::Index(Box::new(IndexExpr { collection, key })))
    }

    /// `x.name(args)` is a method call; a bare `x.name` indexes with `"name"`.
    fn parse_dot(&mut self, receiver: Expr) -> Option<Expr> {
        self.next_token();
        let method = self.expect_ident()?;
        if self.cur_token_is(TokenKind::LParen) {
            let args = self.parse_call_args()?;
            return Some(Expr::MethodCall(Box::new(MethodCallExpr {
                receiver,
                method,
                args,
            })));
        }
        let key = Expr::String(StringLit {
            position: method.position,
            value: method.name,
        });
        Some(Expr::Index(Box::new(IndexExpr {
            collection: receiver,
            key,
        })))
    }
}

/// Parse source code into a program.
pub fn parse(source: &str) -> Result<Program, ParserError> {
    Parser::new(Lexer::new(source)).parse()
}
