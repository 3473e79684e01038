//! Single-pass bytecode compiler for YASL.
//!
//! Each top-level statement is compiled into a scratch buffer that is moved
//! into the code region only if the statement compiled cleanly. Errors are
//! collected rather than aborting, so one compile reports every problem.

use std::collections::HashMap;
use std::fmt;
use std::mem;

use thiserror::Error;
use yasl_bytecode::{Artifact, ByteBuffer, Op, HEADER_PREFIX_LEN, OPERAND_WIDTH};
use yasl_parser::*;

use crate::env::{Binding, Env};

/// Compilation errors. Every variant carries the 1-indexed source line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("SyntaxError: {0}")]
    Syntax(#[from] ParserError),

    #[error("NameError: undeclared variable `{name}` (line {line})")]
    UndeclaredVariable { name: String, line: usize },

    #[error("NameError: illegal redeclaration of `{name}` (line {line})")]
    IllegalRedeclaration { name: String, line: usize },

    #[error("NameError: cannot assign to constant `{name}` (line {line})")]
    AssignToConst { name: String, line: usize },

    #[error("SyntaxError: functions may only be declared at top level (line {line})")]
    IllegalNestedFunctionDeclaration { line: usize },

    #[error("SyntaxError: break outside of loop (line {line})")]
    BreakOutsideLoop { line: usize },

    #[error("SyntaxError: continue outside of loop (line {line})")]
    ContinueOutsideLoop { line: usize },

    #[error("SyntaxError: return outside of function (line {line})")]
    ReturnOutsideFunction { line: usize },

    #[error("SyntaxError: function `{name}` needs more than 255 parameters or locals (line {line})")]
    TooManyLocals { name: String, line: usize },
}

impl CompileError {
    pub fn line(&self) -> usize {
        match self {
            CompileError::Syntax(err) => err.line(),
            CompileError::UndeclaredVariable { line, .. }
            | CompileError::IllegalRedeclaration { line, .. }
            | CompileError::AssignToConst { line, .. }
            | CompileError::IllegalNestedFunctionDeclaration { line }
            | CompileError::BreakOutsideLoop { line }
            | CompileError::ContinueOutsideLoop { line }
            | CompileError::ReturnOutsideFunction { line }
            | CompileError::TooManyLocals { line, .. } => *line,
        }
    }
}

/// Every error from one failed compile, in source order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    pub fn errors(&self) -> &[CompileError] {
        &self.0
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("\n"))
    }
}

/// Branch targets of the innermost enclosing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Checkpoint {
    /// Where `continue` jumps.
    continue_target: usize,
    /// The loop's exit test; `break` jumps here with false on the stack.
    break_target: usize,
}

/// Where a name resolved to.
enum Resolved {
    Local(Binding),
    Global(Binding),
}

impl Resolved {
    fn binding(&self) -> Binding {
        match self {
            Resolved::Local(b) | Resolved::Global(b) => *b,
        }
    }
}

/// Bytecode compiler for YASL.
pub struct Compiler {
    globals: Env,
    /// Parameters and locals of the function being compiled.
    locals: Option<Env>,
    /// String contents to their header offsets.
    strings: HashMap<String, usize>,
    header: ByteBuffer,
    /// Code of the current statement or function body.
    buffer: ByteBuffer,
    code: ByteBuffer,
    checkpoints: Vec<Checkpoint>,
    errors: Vec<CompileError>,
}

impl Compiler {
    pub fn new() -> Self {
        let mut header = ByteBuffer::new();
        header.reserve_placeholder();
        header.reserve_placeholder();
        Self {
            globals: Env::new(),
            locals: None,
            strings: HashMap::new(),
            header,
            buffer: ByteBuffer::new(),
            code: ByteBuffer::new(),
            checkpoints: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Compile a program into an artifact, or return every error found.
    pub fn compile(mut self, program: &Program) -> Result<Artifact, CompileErrors> {
        for stmt in &program.stmts {
            let errors_before = self.errors.len();
            self.compile_statement(stmt);
            if self.errors.len() == errors_before {
                self.code.append(self.buffer.as_bytes());
            }
            self.buffer.clear();
        }

        if !self.errors.is_empty() {
            log::debug!("compilation failed with {} error(s)", self.errors.len());
            return Err(CompileErrors(self.errors));
        }

        let pool_len = self.header.len() - HEADER_PREFIX_LEN;
        self.header.rewrite_int(0, pool_len as i64);
        self.header
            .rewrite_int(OPERAND_WIDTH, self.globals.slot_count() as i64);

        let artifact = Artifact::assemble(self.header.into_bytes(), self.code.as_bytes());
        log::debug!(
            "compiled {} statement(s): {} header bytes, {} code bytes, {} global(s)",
            program.stmts.len(),
            artifact.entry_point(),
            artifact.code().len(),
            artifact.global_count()
        );
        log::debug!("artifact:\n{}", artifact.hex_dump());
        Ok(artifact)
    }

    // ===========================================================================
    // Statements
    // ===========================================================================

    fn compile_statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(expr) => {
                if expr.is_literal() {
                    return;
                }
                self.compile_expr(expr);
                self.emit(Op::Pop);
            }
            Stmt::Echo(s) => {
                self.compile_expr(&s.value);
                self.emit(Op::Print);
            }
            Stmt::Let(s) => self.compile_let(s),
            Stmt::Fn(decl) => self.compile_fn(decl),
            Stmt::Return(s) => self.compile_return(s),
            Stmt::Block(block) => self.compile_block(block),
            Stmt::If(s) => self.compile_if(s),
            Stmt::While(s) => self.compile_while(s),
            Stmt::ForIter(s) => self.compile_for_iter(s),
            Stmt::Break(pos) => match self.checkpoints.last().copied() {
                Some(checkpoint) => {
                    self.emit(Op::BConstF);
                    self.branch_back(checkpoint.break_target);
                }
                None => self.error(CompileError::BreakOutsideLoop {
                    line: pos.line_number(),
                }),
            },
            Stmt::Continue(pos) => match self.checkpoints.last().copied() {
                Some(checkpoint) => self.branch_back(checkpoint.continue_target),
                None => self.error(CompileError::ContinueOutsideLoop {
                    line: pos.line_number(),
                }),
            },
        }
    }

    fn compile_block(&mut self, block: &Block) {
        self.with_scope(|c| {
            for stmt in &block.stmts {
                c.compile_statement(stmt);
            }
        });
    }

    /// `let`, `const` and `:=`. The name is visible in its own initializer.
    fn compile_let(&mut self, stmt: &LetStmt) {
        if self.declare(&stmt.name).is_none() {
            return;
        }
        match &stmt.value {
            Some(value) => self.compile_expr(value),
            None => {
                self.emit(Op::NConst);
            }
        }
        self.store_var(&stmt.name);
        if stmt.is_const {
            self.active_env().mark_const(&stmt.name.name);
        }
    }

    fn compile_fn(&mut self, decl: &FnDecl) {
        let line = decl.fn_pos.line_number();
        if self.locals.is_some() {
            self.error(CompileError::IllegalNestedFunctionDeclaration { line });
            return;
        }
        if self.declare(&decl.name).is_none() {
            return;
        }

        let mut locals = Env::new();
        for param in &decl.params {
            if locals.declare(&param.name).is_err() {
                self.error(CompileError::IllegalRedeclaration {
                    name: param.name.clone(),
                    line: param.position.line_number(),
                });
                return;
            }
        }
        locals.enter_scope();

        let outer_buffer = mem::take(&mut self.buffer);
        let outer_checkpoints = mem::take(&mut self.checkpoints);
        self.locals = Some(locals);
        for stmt in &decl.body.stmts {
            self.compile_statement(stmt);
        }
        let local_count = self.locals.take().map_or(0, |env| env.slot_count());
        self.checkpoints = outer_checkpoints;
        let body = mem::replace(&mut self.buffer, outer_buffer);

        if decl.params.len() > u8::MAX as usize || local_count > u8::MAX as usize {
            self.error(CompileError::TooManyLocals {
                name: decl.name.name.clone(),
                line,
            });
            return;
        }

        let offset = self.header.add_byte(decl.params.len() as u8);
        let local_count_at = self.header.add_byte(0);
        self.header.append(body.as_bytes());
        self.header.add_op(Op::NConst);
        self.header.add_op(Op::Ret);
        self.header.rewrite_byte(local_count_at, local_count as u8);

        self.emit_with_operand(Op::FConst, offset as i64);
        self.store_var(&decl.name);
        self.globals.mark_const(&decl.name.name);
    }

    fn compile_return(&mut self, stmt: &ReturnStmt) {
        if self.locals.is_none() {
            self.error(CompileError::ReturnOutsideFunction {
                line: stmt.return_pos.line_number(),
            });
            return;
        }
        match &stmt.value {
            Some(value) => self.compile_expr(value),
            None => {
                self.emit(Op::NConst);
            }
        }
        self.emit(Op::Ret);
    }

    fn compile_if(&mut self, stmt: &IfStmt) {
        self.compile_expr(&stmt.condition);
        let else_branch = self.emit_branch(Op::Brf8);
        self.compile_block(&stmt.consequence);
        match &stmt.alternative {
            Some(alternative) => {
                let end = self.emit_branch(Op::Br8);
                self.patch_branch(else_branch);
                self.compile_statement(alternative);
                self.patch_branch(end);
            }
            None => self.patch_branch(else_branch),
        }
    }

    fn compile_while(&mut self, stmt: &WhileStmt) {
        let mut start = self.buffer.len();
        if let Some(post) = &stmt.post {
            let skip_post = self.emit_branch(Op::Br8);
            start = self.buffer.len();
            self.compile_statement(post);
            self.patch_branch(skip_post);
        }

        self.compile_expr(&stmt.condition);
        let break_target = self.buffer.len();
        let exit = self.emit_branch(Op::Brf8);

        let checkpoint = Checkpoint {
            continue_target: start,
            break_target,
        };
        self.with_loop(checkpoint, |c| c.compile_block(&stmt.body));
        self.branch_back(start);
        self.patch_branch(exit);
    }

    fn compile_for_iter(&mut self, stmt: &ForIterStmt) {
        self.with_scope(|c| {
            c.compile_expr(&stmt.iterable);
            c.emit(Op::InitFor);

            if stmt.declare {
                if c.declare(&stmt.name).is_none() {
                    return;
                }
            } else if c.resolve(&stmt.name.name).is_none() {
                c.undeclared(&stmt.name);
                return;
            }

            let start = c.emit(Op::Iter);
            let break_target = c.buffer.len();
            let exit = c.emit_branch(Op::Brf8);
            c.store_var(&stmt.name);

            let checkpoint = Checkpoint {
                continue_target: start,
                break_target,
            };
            c.with_loop(checkpoint, |c| c.compile_block(&stmt.body));
            c.branch_back(start);
            c.patch_branch(exit);
            c.emit(Op::EndFor);
        });
    }

    // ===========================================================================
    // Expressions
    // ===========================================================================

    fn compile_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Undef(_) => {
                self.emit(Op::NConst);
            }
            Expr::Bool(lit) => {
                self.emit(if lit.value { Op::BConstT } else { Op::BConstF });
            }
            Expr::Int(lit) => self.emit_with_operand(Op::IConst, lit.value),
            Expr::Float(lit) => {
                if lit.value.is_nan() {
                    self.emit(Op::DConstN);
                } else if lit.value == f64::INFINITY {
                    self.emit(Op::DConstI);
                } else {
                    self.emit(Op::DConst);
                    self.buffer.add_float(lit.value);
                }
            }
            Expr::String(lit) => {
                let offset = self.intern_string(&lit.value);
                self.emit_with_operand(Op::NewStr, offset as i64);
            }
            Expr::Ident(ident) => self.load_var(ident),
            Expr::Prefix(prefix) => {
                self.compile_expr(&prefix.right);
                self.emit(match prefix.op {
                    UnaryOp::Plus => Op::Nop,
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Not => Op::Not,
                    UnaryOp::BitNot => Op::BNot,
                    UnaryOp::Len => Op::Len,
                });
            }
            Expr::Infix(infix) => {
                self.compile_expr(&infix.left);
                self.compile_expr(&infix.right);
                self.emit_binary(infix.op);
            }
            Expr::Logical(logical) => {
                self.compile_expr(&logical.left);
                self.emit(Op::Dup);
                let skip = self.emit_branch(match logical.op {
                    LogicalOp::And => Op::Brf8,
                    LogicalOp::Or => Op::Brt8,
                    LogicalOp::Nullish => Op::Brn8,
                });
                self.emit(Op::Pop);
                self.compile_expr(&logical.right);
                self.patch_branch(skip);
            }
            Expr::Ternary(ternary) => {
                self.compile_expr(&ternary.condition);
                let else_branch = self.emit_branch(Op::Brf8);
                self.compile_expr(&ternary.consequence);
                let end = self.emit_branch(Op::Br8);
                self.patch_branch(else_branch);
                self.compile_expr(&ternary.alternative);
                self.patch_branch(end);
            }
            Expr::Assign(assign) => {
                if self.resolve(&assign.name.name).is_none() {
                    self.undeclared(&assign.name);
                    return;
                }
                self.compile_expr(&assign.value);
                self.emit(Op::Dup);
                self.store_var(&assign.name);
            }
            Expr::List(list) => {
                self.emit(Op::End);
                for item in &list.items {
                    self.compile_expr(item);
                }
                self.emit(Op::NewList);
            }
            Expr::Table(table) => {
                self.emit(Op::End);
                for (key, value) in &table.entries {
                    self.compile_expr(key);
                    self.compile_expr(value);
                }
                self.emit(Op::NewTable);
            }
            Expr::ListComp(comp) => self.compile_comprehension(&comp.clause, Op::NewList, |c| {
                c.compile_expr(&comp.element);
            }),
            Expr::TableComp(comp) => {
                self.compile_comprehension(&comp.clause, Op::NewTable, |c| {
                    c.compile_expr(&comp.key);
                    c.compile_expr(&comp.value);
                })
            }
            Expr::Call(call) => {
                self.compile_expr(&call.function);
                self.emit(Op::InitCall);
                for arg in &call.args {
                    self.compile_expr(arg);
                }
                self.emit(Op::Call);
            }
            Expr::MethodCall(call) => {
                self.compile_expr(&call.receiver);
                let name = self.intern_string(&call.method.name);
                self.emit_with_operand(Op::InitMCall, name as i64);
                for arg in &call.args {
                    self.compile_expr(arg);
                }
                self.emit(Op::Call);
            }
            Expr::Index(index) => {
                self.compile_expr(&index.collection);
                self.compile_expr(&index.key);
                self.emit(Op::Get);
            }
            Expr::SetIndex(set) => {
                self.compile_expr(&set.collection);
                self.compile_expr(&set.key);
                self.compile_expr(&set.value);
                self.emit(Op::Set);
            }
        }
    }

    fn emit_binary(&mut self, op: BinaryOp) {
        match op {
            BinaryOp::Add => self.emit(Op::Add),
            BinaryOp::Sub => self.emit(Op::Sub),
            BinaryOp::Mul => self.emit(Op::Mul),
            BinaryOp::Div => self.emit(Op::FDiv),
            BinaryOp::IntDiv => self.emit(Op::IDiv),
            BinaryOp::Mod => self.emit(Op::Mod),
            BinaryOp::Pow => self.emit(Op::Exp),
            BinaryOp::Concat => self.emit(Op::Cnct),
            BinaryOp::BitAnd => self.emit(Op::BAnd),
            BinaryOp::BitAndNot => self.emit(Op::BAndNot),
            BinaryOp::BitOr => self.emit(Op::BOr),
            BinaryOp::BitXor => self.emit(Op::BXor),
            BinaryOp::Shl => self.emit(Op::Bsl),
            BinaryOp::Shr => self.emit(Op::Bsr),
            BinaryOp::Eq => self.emit(Op::Eq),
            BinaryOp::Identical => self.emit(Op::Id),
            BinaryOp::Gt => self.emit(Op::Gt),
            BinaryOp::GtEq => self.emit(Op::Ge),
            BinaryOp::NotEq => {
                self.emit(Op::Eq);
                self.emit(Op::Not)
            }
            BinaryOp::NotIdentical => {
                self.emit(Op::Id);
                self.emit(Op::Not)
            }
            BinaryOp::Lt => {
                self.emit(Op::Ge);
                self.emit(Op::Not)
            }
            BinaryOp::LtEq => {
                self.emit(Op::Gt);
                self.emit(Op::Not)
            }
        };
    }

    /// Shared lowering of list and table comprehensions; `element` emits the
    /// value (or key and value) pushed for each item that passes the filter.
    fn compile_comprehension(
        &mut self,
        clause: &CompClause,
        collect: Op,
        element: impl FnOnce(&mut Self),
    ) {
        self.with_scope(|c| {
            c.compile_expr(&clause.iterable);
            c.emit(Op::InitFor);
            c.emit(Op::End);
            if c.declare(&clause.name).is_none() {
                return;
            }

            let start = c.emit(Op::Iter);
            let exit = c.emit_branch(Op::Brf8);
            c.store_var(&clause.name);

            let skip = clause.filter.as_ref().map(|filter| {
                c.compile_expr(filter);
                c.emit_branch(Op::Brf8)
            });
            element(c);
            if let Some(skip) = skip {
                c.patch_branch(skip);
            }

            c.branch_back(start);
            c.patch_branch(exit);
            c.emit(collect);
            c.emit(Op::EndComp);
        });
    }

    // ===========================================================================
    // Variables
    // ===========================================================================

    /// The chain new names go into: locals inside a function, else globals.
    fn active_env(&mut self) -> &mut Env {
        match &mut self.locals {
            Some(locals) => locals,
            None => &mut self.globals,
        }
    }

    fn declare(&mut self, name: &Ident) -> Option<usize> {
        match self.active_env().declare(&name.name) {
            Ok(slot) => Some(slot),
            Err(_) => {
                self.error(CompileError::IllegalRedeclaration {
                    name: name.name.clone(),
                    line: name.position.line_number(),
                });
                None
            }
        }
    }

    fn resolve(&self, name: &str) -> Option<Resolved> {
        if let Some(binding) = self.locals.as_ref().and_then(|env| env.lookup(name)) {
            return Some(Resolved::Local(binding));
        }
        self.globals.lookup(name).map(Resolved::Global)
    }

    fn load_var(&mut self, name: &Ident) {
        match self.resolve(&name.name) {
            Some(Resolved::Local(b)) => self.emit_with_operand(Op::LLoad, b.slot as i64),
            Some(Resolved::Global(b)) => self.emit_with_operand(Op::GLoad, b.slot as i64),
            None => self.undeclared(name),
        }
    }

    /// Pop the top of the stack into `name`.
    fn store_var(&mut self, name: &Ident) {
        let Some(resolved) = self.resolve(&name.name) else {
            self.undeclared(name);
            return;
        };
        if resolved.binding().is_const {
            self.error(CompileError::AssignToConst {
                name: name.name.clone(),
                line: name.position.line_number(),
            });
            return;
        }
        match resolved {
            Resolved::Local(b) => self.emit_with_operand(Op::LStore, b.slot as i64),
            Resolved::Global(b) => self.emit_with_operand(Op::GStore, b.slot as i64),
        }
    }

    fn intern_string(&mut self, value: &str) -> usize {
        if let Some(&offset) = self.strings.get(value) {
            return offset;
        }
        let offset = self.header.add_int(value.len() as i64);
        self.header.append(value.as_bytes());
        self.strings.insert(value.to_string(), offset);
        offset
    }

    // ===========================================================================
    // Scopes and Loops
    // ===========================================================================

    /// Run `f` inside a new scope of the active chain.
    fn with_scope(&mut self, f: impl FnOnce(&mut Self)) {
        self.active_env().enter_scope();
        f(self);
        self.active_env().exit_scope();
    }

    /// Run `f` with `checkpoint` as the innermost loop.
    fn with_loop(&mut self, checkpoint: Checkpoint, f: impl FnOnce(&mut Self)) {
        self.checkpoints.push(checkpoint);
        f(self);
        self.checkpoints.pop();
    }

    // ===========================================================================
    // Emission
    // ===========================================================================

    fn emit(&mut self, op: Op) -> usize {
        self.buffer.add_op(op)
    }

    fn emit_with_operand(&mut self, op: Op, operand: i64) {
        self.buffer.add_op(op);
        self.buffer.add_int(operand);
    }

    /// Emit a branch with a placeholder distance, returning the placeholder.
    fn emit_branch(&mut self, op: Op) -> usize {
        self.buffer.add_op(op);
        self.buffer.reserve_placeholder()
    }

    /// Point a forward branch at the current end of the buffer.
    fn patch_branch(&mut self, placeholder: usize) {
        let distance = self.buffer.len() - placeholder - OPERAND_WIDTH;
        self.buffer.rewrite_int(placeholder, distance as i64);
    }

    /// Emit an unconditional branch back to `target`.
    fn branch_back(&mut self, target: usize) {
        self.buffer.add_op(Op::Br8);
        let distance = target as i64 - (self.buffer.len() + OPERAND_WIDTH) as i64;
        self.buffer.add_int(distance);
    }

    fn undeclared(&mut self, name: &Ident) {
        self.error(CompileError::UndeclaredVariable {
            name: name.name.clone(),
            line: name.position.line_number(),
        });
    }

    fn error(&mut self, error: CompileError) {
        log::debug!("{}", error);
        self.errors.push(error);
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse and compile source code.
pub fn compile(source: &str) -> Result<Artifact, CompileErrors> {
    let program = yasl_parser::parse(source).map_err(|e| CompileErrors(vec![e.into()]))?;
    Compiler::new().compile(&program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yasl_bytecode::read_int;

    fn compile_source(source: &str) -> Artifact {
        compile(source).unwrap_or_else(|e| panic!("compilation of {:?} failed: {}", source, e))
    }

    fn compile_err(source: &str) -> Vec<CompileError> {
        match compile(source) {
            Ok(_) => panic!("expected {:?} to fail", source),
            Err(errors) => errors.0,
        }
    }

    /// Assemble instructions followed by HALT.
    fn asm(instrs: &[(Op, Option<i64>)]) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        for (op, operand) in instrs {
            buf.add_op(*op);
            if let Some(value) = operand {
                buf.add_int(*value);
            }
        }
        buf.add_op(Op::Halt);
        buf.into_bytes()
    }

    // =========================================================================
    // Artifact Layout
    // =========================================================================

    #[test]
    fn test_echo_true() {
        let artifact = compile_source("echo true;");
        let mut expected = vec![0u8; 16];
        expected.extend([Op::BConstT as u8, Op::Print as u8, Op::Halt as u8]);
        assert_eq!(artifact.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_echo_string() {
        let artifact = compile_source("echo 'YASL';");
        let bytes = artifact.as_bytes();
        assert_eq!(read_int(bytes, 0), Some(12));
        assert_eq!(read_int(bytes, 8), Some(0));
        assert_eq!(read_int(bytes, 16), Some(4));
        assert_eq!(&bytes[24..28], b"YASL");
        assert_eq!(
            artifact.code(),
            asm(&[(Op::NewStr, Some(16)), (Op::Print, None)]).as_slice()
        );
    }

    #[test]
    fn test_declare_and_negate() {
        let artifact = compile_source("x := 16; -x;");
        assert_eq!(artifact.global_count(), 1);
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::IConst, Some(16)),
                (Op::GStore, Some(0)),
                (Op::GLoad, Some(0)),
                (Op::Neg, None),
                (Op::Pop, None),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_literal_statements_are_eliminated() {
        let artifact = compile_source("undef; true; 'YASL'; 10; 10.0;");
        let mut expected = vec![0u8; 16];
        expected.push(Op::Halt as u8);
        assert_eq!(artifact.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_string_deduplication() {
        let artifact = compile_source("echo 'a'; echo 'a'; echo 'b';");
        assert_eq!(artifact.pool_len(), 18);
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::NewStr, Some(16)),
                (Op::Print, None),
                (Op::NewStr, Some(16)),
                (Op::Print, None),
                (Op::NewStr, Some(25)),
                (Op::Print, None),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_float_literals() {
        let artifact = compile_source("echo nan; echo inf; echo 1.5;");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::DConstN, None),
                (Op::Print, None),
                (Op::DConstI, None),
                (Op::Print, None),
                (Op::DConst, Some(1.5f64.to_bits() as i64)),
                (Op::Print, None),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_comparison_lowering() {
        let artifact = compile_source("x := 1; echo x != 2; echo x <= 2;");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::IConst, Some(1)),
                (Op::GStore, Some(0)),
                (Op::GLoad, Some(0)),
                (Op::IConst, Some(2)),
                (Op::Eq, None),
                (Op::Not, None),
                (Op::Print, None),
                (Op::GLoad, Some(0)),
                (Op::IConst, Some(2)),
                (Op::Gt, None),
                (Op::Not, None),
                (Op::Print, None),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_let_without_value_and_assignment() {
        let artifact = compile_source("let x; x = 2;");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::NConst, None),
                (Op::GStore, Some(0)),
                (Op::IConst, Some(2)),
                (Op::Dup, None),
                (Op::GStore, Some(0)),
                (Op::Pop, None),
            ])
            .as_slice()
        );
    }

    // =========================================================================
    // Control Flow
    // =========================================================================

    #[test]
    fn test_short_circuit_and() {
        let artifact = compile_source("x := true and false;");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::BConstT, None),
                (Op::Dup, None),
                (Op::Brf8, Some(2)),
                (Op::Pop, None),
                (Op::BConstF, None),
                (Op::GStore, Some(0)),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_nullish_uses_brn() {
        let artifact = compile_source("x := undef ?? 1;");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::NConst, None),
                (Op::Dup, None),
                (Op::Brn8, Some(10)),
                (Op::Pop, None),
                (Op::IConst, Some(1)),
                (Op::GStore, Some(0)),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_if_else() {
        let artifact = compile_source("if true { echo 1; } else { echo 2; }");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::BConstT, None),
                (Op::Brf8, Some(19)),
                (Op::IConst, Some(1)),
                (Op::Print, None),
                (Op::Br8, Some(10)),
                (Op::IConst, Some(2)),
                (Op::Print, None),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_break_targets_innermost_loop() {
        let artifact = compile_source("while true { while false { break; } break; }");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::BConstT, None),
                (Op::Brf8, Some(48)),
                (Op::BConstF, None),
                (Op::Brf8, Some(19)),
                (Op::BConstF, None),
                (Op::Br8, Some(-19)),
                (Op::Br8, Some(-29)),
                (Op::BConstF, None),
                (Op::Br8, Some(-48)),
                (Op::Br8, Some(-58)),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_continue_targets_innermost_loop() {
        let artifact = compile_source("while true { while false { continue; } continue; }");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::BConstT, None),
                (Op::Brf8, Some(46)),
                (Op::BConstF, None),
                (Op::Brf8, Some(18)),
                (Op::Br8, Some(-19)),
                (Op::Br8, Some(-28)),
                (Op::Br8, Some(-47)),
                (Op::Br8, Some(-56)),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_continue_in_c_style_for_runs_post() {
        let artifact = compile_source("for i := 0; i < 2; i += 1 { continue; }");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::IConst, Some(0)),
                (Op::GStore, Some(0)),
                (Op::Br8, Some(30)),
                (Op::GLoad, Some(0)),
                (Op::IConst, Some(1)),
                (Op::Add, None),
                (Op::Dup, None),
                (Op::GStore, Some(0)),
                (Op::Pop, None),
                (Op::GLoad, Some(0)),
                (Op::IConst, Some(2)),
                (Op::Ge, None),
                (Op::Not, None),
                (Op::Brf8, Some(18)),
                (Op::Br8, Some(-68)),
                (Op::Br8, Some(-77)),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_for_iter_lowering() {
        let artifact = compile_source("for let x <- [] { echo x; }");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::End, None),
                (Op::NewList, None),
                (Op::InitFor, None),
                (Op::Iter, None),
                (Op::Brf8, Some(28)),
                (Op::GStore, Some(0)),
                (Op::GLoad, Some(0)),
                (Op::Print, None),
                (Op::Br8, Some(-38)),
                (Op::EndFor, None),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_list_comprehension_lowering() {
        let artifact = compile_source("echo [x for x <- [] if x];");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::End, None),
                (Op::NewList, None),
                (Op::InitFor, None),
                (Op::End, None),
                (Op::Iter, None),
                (Op::Brf8, Some(45)),
                (Op::GStore, Some(0)),
                (Op::GLoad, Some(0)),
                (Op::Brf8, Some(9)),
                (Op::GLoad, Some(0)),
                (Op::Br8, Some(-55)),
                (Op::NewList, None),
                (Op::EndComp, None),
                (Op::Print, None),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_checkpoints_restored_after_loops() {
        let program = parse("while true { for let x <- [] { undeclared; } }").unwrap();
        let mut compiler = Compiler::new();
        for stmt in &program.stmts {
            compiler.compile_statement(stmt);
        }
        assert!(compiler.checkpoints.is_empty());
        assert_eq!(compiler.globals.depth(), 1);
        assert_eq!(compiler.errors.len(), 1);
    }

    // =========================================================================
    // Functions
    // =========================================================================

    #[test]
    fn test_function_chunk() {
        let artifact = compile_source("fn id(a) { return a; } echo id(1);");
        let header = artifact.header();
        assert_eq!(artifact.pool_len(), 14);
        assert_eq!(header[16], 1); // params
        assert_eq!(header[17], 1); // locals
        assert_eq!(header[18], Op::LLoad as u8);
        assert_eq!(read_int(header, 19), Some(0));
        assert_eq!(
            &header[27..],
            &[Op::Ret as u8, Op::NConst as u8, Op::Ret as u8]
        );
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::FConst, Some(16)),
                (Op::GStore, Some(0)),
                (Op::GLoad, Some(0)),
                (Op::InitCall, None),
                (Op::IConst, Some(1)),
                (Op::Call, None),
                (Op::Print, None),
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_local_count_is_backpatched() {
        let artifact = compile_source("fn f(a) { let b = 1; { let c = 2; } }");
        assert_eq!(artifact.header()[16], 1);
        assert_eq!(artifact.header()[17], 3);
    }

    #[test]
    fn test_method_call() {
        let artifact = compile_source("echo 'a'.upcase();");
        assert_eq!(
            artifact.code(),
            asm(&[
                (Op::NewStr, Some(16)),
                (Op::InitMCall, Some(25)),
                (Op::Call, None),
                (Op::Print, None),
            ])
            .as_slice()
        );
        assert_eq!(artifact.string_at(25), Some(&b"upcase"[..]));
    }

    #[test]
    fn test_recursive_function_resolves_itself() {
        compile_source("fn fact(n) { return n <= 1 ? 1 : n * fact(n - 1); }");
    }

    #[test]
    fn test_function_declared_in_top_level_block() {
        compile_source("if true { fn g() { } }");
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[test]
    fn test_undeclared_variable() {
        assert_eq!(
            compile_err("echo x;"),
            vec![CompileError::UndeclaredVariable {
                name: "x".to_string(),
                line: 1
            }]
        );
        assert!(matches!(
            compile_err("y = 1;")[0],
            CompileError::UndeclaredVariable { .. }
        ));
    }

    #[test]
    fn test_errors_accumulate() {
        let errors = compile_err("echo a;\necho 1;\necho b;");
        let lines: Vec<usize> = errors.iter().map(|e| e.line()).collect();
        assert_eq!(lines, vec![1, 3]);
    }

    #[test]
    fn test_redeclaration_and_shadowing() {
        assert!(matches!(
            compile_err("let x = 1; let x = 2;")[0],
            CompileError::IllegalRedeclaration { ref name, line: 1 } if name == "x"
        ));
        let artifact = compile_source("let x = 1; { let x = 2; }");
        assert_eq!(artifact.global_count(), 2);
    }

    #[test]
    fn test_assign_to_const() {
        assert!(matches!(
            compile_err("const x = 1;\nx = 2;")[0],
            CompileError::AssignToConst { line: 2, .. }
        ));
        assert!(matches!(
            compile_err("fn f() { } f = 1;")[0],
            CompileError::AssignToConst { .. }
        ));
        assert!(matches!(
            compile_err("const x = 1; for x <- [] { }")[0],
            CompileError::AssignToConst { .. }
        ));
    }

    #[test]
    fn test_break_and_continue_outside_loop() {
        assert_eq!(
            compile_err("break;"),
            vec![CompileError::BreakOutsideLoop { line: 1 }]
        );
        assert_eq!(
            compile_err("if true {\n continue;\n}"),
            vec![CompileError::ContinueOutsideLoop { line: 2 }]
        );
        assert!(matches!(
            compile_err("while true { fn g() { break; } }")[0],
            CompileError::BreakOutsideLoop { .. }
        ));
    }

    #[test]
    fn test_function_errors() {
        assert_eq!(
            compile_err("fn f() { fn g() { } }"),
            vec![CompileError::IllegalNestedFunctionDeclaration { line: 1 }]
        );
        assert_eq!(
            compile_err("return 1;"),
            vec![CompileError::ReturnOutsideFunction { line: 1 }]
        );
        assert!(matches!(
            compile_err("fn f(a, a) { }")[0],
            CompileError::IllegalRedeclaration { .. }
        ));
        assert!(matches!(
            compile_err("fn f() { return later; } let later = 1;")[0],
            CompileError::UndeclaredVariable { .. }
        ));
    }

    #[test]
    fn test_for_requires_declared_variable() {
        assert!(matches!(
            compile_err("for x <- [1] { }")[0],
            CompileError::UndeclaredVariable { .. }
        ));
        compile_source("let x; for x <- [1] { }");
    }

    #[test]
    fn test_syntax_error_passthrough() {
        let errors = compile_err("echo (1;");
        assert!(matches!(errors[0], CompileError::Syntax(_)));
        assert!(errors[0].to_string().starts_with("SyntaxError"));
    }
}
