//! AST node types for the YASL parser.
//!
//! The tree is closed: `Expr` and `Stmt` enumerate every construct, so
//! consumers that `match` on them are checked for exhaustiveness.

use std::fmt;

use yasl_lexer::Position;

/// Base trait for all AST nodes.
pub trait Node: fmt::Display {
    fn pos(&self) -> Position;

    /// 1-indexed source line.
    fn line(&self) -> usize {
        self.pos().line_number()
    }
}

/// A parsed program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stmts: Vec<String> = self.stmts.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", stmts.join("; "))
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
    BitNot,
    Len,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOp::Plus => "+",
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "^",
            UnaryOp::Len => "len ",
        };
        write!(f, "{}", s)
    }
}

/// Strict binary operators; both operands are always evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    Concat,
    BitAnd,
    BitAndNot,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOp {
    /// Operator of a compound assignment such as `+=`.
    pub fn from_compound(literal: &str) -> Option<BinaryOp> {
        let op = match literal.strip_suffix('=')? {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "//" => BinaryOp::IntDiv,
            "%" => BinaryOp::Mod,
            "**" => BinaryOp::Pow,
            "~" => BinaryOp::Concat,
            "&" => BinaryOp::BitAnd,
            "&^" => BinaryOp::BitAndNot,
            "|" => BinaryOp::BitOr,
            "^" => BinaryOp::BitXor,
            "<<" => BinaryOp::Shl,
            ">>" => BinaryOp::Shr,
            _ => return None,
        };
        Some(op)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::IntDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Concat => "~",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitAndNot => "&^",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Identical => "===",
            BinaryOp::NotIdentical => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Short-circuiting operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    /// `??`: right operand only when the left is undef.
    Nullish,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
            LogicalOp::Nullish => "??",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Expression node enumeration.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Undef(Position),
    Bool(BoolLit),
    Int(IntLit),
    Float(FloatLit),
    String(StringLit),
    Ident(Ident),
    Prefix(Box<PrefixExpr>),
    Infix(Box<InfixExpr>),
    Logical(Box<LogicalExpr>),
    Ternary(Box<TernaryExpr>),
    Assign(Box<AssignExpr>),
    List(ListLit),
    Table(TableLit),
    ListComp(Box<ListComp>),
    TableComp(Box<TableComp>),
    Call(Box<CallExpr>),
    MethodCall(Box<MethodCallExpr>),
    Index(Box<IndexExpr>),
    SetIndex(Box<SetIndexExpr>),
}

impl Expr {
    /// Whether this is a bare literal with no side effects.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::Undef(_) | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::String(_)
        )
    }
}

impl Node for Expr {
    fn pos(&self) -> Position {
        match self {
            Expr::Undef(pos) => *pos,
            Expr::Bool(e) => e.position,
            Expr::Int(e) => e.position,
            Expr::Float(e) => e.position,
            Expr::String(e) => e.position,
            Expr::Ident(e) => e.position,
            Expr::Prefix(e) => e.op_pos,
            Expr::Infix(e) => e.left.pos(),
            Expr::Logical(e) => e.left.pos(),
            Expr::Ternary(e) => e.condition.pos(),
            Expr::Assign(e) => e.name.position,
            Expr::List(e) => e.lbrack,
            Expr::Table(e) => e.lbrack,
            Expr::ListComp(e) => e.lbrack,
            Expr::TableComp(e) => e.lbrack,
            Expr::Call(e) => e.function.pos(),
            Expr::MethodCall(e) => e.receiver.pos(),
            Expr::Index(e) => e.collection.pos(),
            Expr::SetIndex(e) => e.collection.pos(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Undef(_) => write!(f, "undef"),
            Expr::Bool(e) => write!(f, "{}", e.value),
            Expr::Int(e) => write!(f, "{}", e.literal),
            Expr::Float(e) => write!(f, "{}", e.literal),
            Expr::String(e) => write!(f, "{:?}", e.value),
            Expr::Ident(e) => write!(f, "{}", e),
            Expr::Prefix(e) => write!(f, "({}{})", e.op, e.right),
            Expr::Infix(e) => write!(f, "({} {} {})", e.left, e.op, e.right),
            Expr::Logical(e) => write!(f, "({} {} {})", e.left, e.op, e.right),
            Expr::Ternary(e) => write!(
                f,
                "({} ? {} : {})",
                e.condition, e.consequence, e.alternative
            ),
            Expr::Assign(e) => write!(f, "{} = {}", e.name, e.value),
            Expr::List(e) => write!(f, "[{}]", join(&e.items)),
            Expr::Table(e) => {
                if e.entries.is_empty() {
                    return write!(f, "[->]");
                }
                let entries: Vec<String> = e
                    .entries
                    .iter()
                    .map(|(k, v)| format!("{} -> {}", k, v))
                    .collect();
                write!(f, "[{}]", entries.join(", "))
            }
            Expr::ListComp(e) => {
                write!(f, "[{} {}]", e.element, e.clause)
            }
            Expr::TableComp(e) => {
                write!(f, "[{} -> {} {}]", e.key, e.value, e.clause)
            }
            Expr::Call(e) => write!(f, "{}({})", e.function, join(&e.args)),
            Expr::MethodCall(e) => {
                write!(f, "{}.{}({})", e.receiver, e.method, join(&e.args))
            }
            Expr::Index(e) => write!(f, "{}[{}]", e.collection, e.key),
            Expr::SetIndex(e) => write!(f, "{}[{}] = {}", e.collection, e.key, e.value),
        }
    }
}

fn join(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoolLit {
    pub position: Position,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntLit {
    pub position: Position,
    pub literal: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloatLit {
    pub position: Position,
    pub literal: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringLit {
    pub position: Position,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub position: Position,
    pub name: String,
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrefixExpr {
    pub op_pos: Position,
    pub op: UnaryOp,
    pub right: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfixExpr {
    pub left: Expr,
    pub op: BinaryOp,
    pub right: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalExpr {
    pub left: Expr,
    pub op: LogicalOp,
    pub right: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TernaryExpr {
    pub condition: Expr,
    pub consequence: Expr,
    pub alternative: Expr,
}

/// Assignment to a variable; evaluates to the assigned value.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignExpr {
    pub name: Ident,
    pub value: Expr,
}

// ============================================================================
// Collections
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ListLit {
    pub lbrack: Position,
    pub items: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableLit {
    pub lbrack: Position,
    pub entries: Vec<(Expr, Expr)>,
}

/// The `for x <- xs if cond` tail of a comprehension.
#[derive(Debug, Clone, PartialEq)]
pub struct CompClause {
    pub name: Ident,
    pub iterable: Expr,
    pub filter: Option<Expr>,
}

impl fmt::Display for CompClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "for {} <- {}", self.name, self.iterable)?;
        if let Some(filter) = &self.filter {
            write!(f, " if {}", filter)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListComp {
    pub lbrack: Position,
    pub element: Expr,
    pub clause: CompClause,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableComp {
    pub lbrack: Position,
    pub key: Expr,
    pub value: Expr,
    pub clause: CompClause,
}

// ============================================================================
// Calls and Indexing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub function: Expr,
    pub args: Vec<Expr>,
}

/// `receiver.method(args)`, dispatched on the receiver's type.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCallExpr {
    pub receiver: Expr,
    pub method: Ident,
    pub args: Vec<Expr>,
}

/// `collection[key]`, also produced for `collection.key`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexExpr {
    pub collection: Expr,
    pub key: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetIndexExpr {
    pub collection: Expr,
    pub key: Expr,
    pub value: Expr,
}

// ============================================================================
// Statements
// ============================================================================

/// Statement node enumeration.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Echo(EchoStmt),
    Let(LetStmt),
    Fn(Box<FnDecl>),
    Return(ReturnStmt),
    Block(Block),
    If(Box<IfStmt>),
    While(Box<WhileStmt>),
    ForIter(Box<ForIterStmt>),
    Break(Position),
    Continue(Position),
}

impl Node for Stmt {
    fn pos(&self) -> Position {
        match self {
            Stmt::Expr(e) => e.pos(),
            Stmt::Echo(s) => s.echo_pos,
            Stmt::Let(s) => s.let_pos,
            Stmt::Fn(s) => s.fn_pos,
            Stmt::Return(s) => s.return_pos,
            Stmt::Block(s) => s.lbrace,
            Stmt::If(s) => s.if_pos,
            Stmt::While(s) => s.while_pos,
            Stmt::ForIter(s) => s.for_pos,
            Stmt::Break(pos) | Stmt::Continue(pos) => *pos,
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Expr(e) => write!(f, "{}", e),
            Stmt::Echo(s) => write!(f, "echo {}", s.value),
            Stmt::Let(s) => {
                let keyword = if s.is_const { "const" } else { "let" };
                match &s.value {
                    Some(v) => write!(f, "{} {} = {}", keyword, s.name, v),
                    None => write!(f, "{} {}", keyword, s.name),
                }
            }
            Stmt::Fn(s) => {
                let params: Vec<&str> = s.params.iter().map(|p| p.name.as_str()).collect();
                write!(f, "fn {}({}) {}", s.name, params.join(", "), s.body)
            }
            Stmt::Return(s) => match &s.value {
                Some(v) => write!(f, "return {}", v),
                None => write!(f, "return"),
            },
            Stmt::Block(b) => write!(f, "{}", b),
            Stmt::If(s) => {
                write!(f, "if {} {}", s.condition, s.consequence)?;
                if let Some(alt) = &s.alternative {
                    write!(f, " else {}", alt)?;
                }
                Ok(())
            }
            Stmt::While(s) => match &s.post {
                Some(post) => write!(f, "while {}; {} {}", s.condition, post, s.body),
                None => write!(f, "while {} {}", s.condition, s.body),
            },
            Stmt::ForIter(s) => {
                let binding = if s.declare { "let " } else { "" };
                write!(f, "for {}{} <- {} {}", binding, s.name, s.iterable, s.body)
            }
            Stmt::Break(_) => write!(f, "break"),
            Stmt::Continue(_) => write!(f, "continue"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EchoStmt {
    pub echo_pos: Position,
    pub value: Expr,
}

/// `let`, `const` and `:=` declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct LetStmt {
    pub let_pos: Position,
    pub name: Ident,
    pub value: Option<Expr>,
    pub is_const: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub fn_pos: Position,
    pub name: Ident,
    pub params: Vec<Ident>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub return_pos: Position,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub lbrace: Position,
    pub stmts: Vec<Stmt>,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stmts: Vec<String> = self.stmts.iter().map(|s| s.to_string()).collect();
        if stmts.is_empty() {
            write!(f, "{{ }}")
        } else {
            write!(f, "{{ {} }}", stmts.join("; "))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub if_pos: Position,
    pub condition: Expr,
    pub consequence: Block,
    /// Either a `Block` (else) or another `If` (elseif).
    pub alternative: Option<Stmt>,
}

/// `while` loops, and the loop half of a C-style `for`.
#[derive(Debug, Clone, PartialEq)]
pub struct WhileStmt {
    pub while_pos: Position,
    pub condition: Expr,
    pub body: Block,
    /// Step run before each re-test of the condition.
    pub post: Option<Stmt>,
}

/// `for x <- xs { }` and `for let x <- xs { }`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForIterStmt {
    pub for_pos: Position,
    pub name: Ident,
    pub declare: bool,
    pub iterable: Expr,
    pub body: Block,
}
