//! YASL Virtual Machine - bytecode execution engine.

use std::io::{self, Stdout, Write};
use std::rc::Rc;

use thiserror::Error;
use yasl_bytecode::{read_float, read_int, Artifact, Op, OPERAND_WIDTH};

use crate::builtins::{create_builtins, MethodTable};
use crate::frame::{Frame, LoopIter};
use crate::value::{Function, Key, Table, Value};

/// Default operand stack limit.
pub const DEFAULT_MAX_STACK_DEPTH: usize = 100_024;
/// Default call frame limit.
pub const DEFAULT_MAX_FRAME_DEPTH: usize = 1024;

/// Fatal runtime error.
#[derive(Error, Debug)]
pub enum VMError {
    #[error("TypeError: {op} not supported for operands of types {left} and {right}.")]
    BinaryType {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("TypeError: {op} not supported for operand of type {operand}.")]
    UnaryType {
        op: &'static str,
        operand: &'static str,
    },

    #[error("TypeError: {0}.")]
    Type(String),

    #[error("TypeError: {0} is not callable.")]
    NotCallable(&'static str),

    #[error("TypeError: no method `{name}` for type {kind}.")]
    MissingMethod { kind: &'static str, name: String },

    #[error("DivisionByZeroError")]
    DivisionByZero,

    #[error("IndexError: index {index} out of range for length {len}.")]
    Index { index: i64, len: usize },

    #[error("ArgumentError: {name} expected {expected} argument(s), got {got}.")]
    ArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("StackOverflowError")]
    StackOverflow,

    #[error("stack underflow")]
    StackUnderflow,

    #[error("invalid opcode 0x{byte:02x} at {pc:#06x}")]
    InvalidOpcode { byte: u8, pc: usize },

    #[error("truncated instruction at {0:#06x}")]
    Truncated(usize),

    #[error("invalid slot {slot} at {pc:#06x}")]
    InvalidSlot { slot: i64, pc: usize },

    #[error("output error: {0}")]
    Output(#[from] io::Error),
}

/// VM configuration options.
pub struct VMConfig {
    pub max_stack_depth: usize,
    pub max_frame_depth: usize,
    /// Methods available through `value.name(...)`.
    pub methods: MethodTable,
}

impl Default for VMConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            max_frame_depth: DEFAULT_MAX_FRAME_DEPTH,
            methods: create_builtins(),
        }
    }
}

/// YASL Virtual Machine.
pub struct VM<W: Write = Stdout> {
    /// Operand stack; a function's locals live at `stack[fp + slot]`.
    stack: Vec<Value>,
    /// Frame pointer of the active function.
    fp: usize,
    pc: usize,
    frames: Vec<Frame>,
    /// Stack indices of callees waiting for `CALL`.
    call_marks: Vec<usize>,
    /// Stack heights recorded by `END`.
    collection_marks: Vec<usize>,
    loops: Vec<LoopIter>,
    globals: Vec<Value>,
    methods: MethodTable,
    max_stack_depth: usize,
    max_frame_depth: usize,
    out: W,
}

impl VM<Stdout> {
    /// Create a VM that prints to standard output.
    pub fn new(config: VMConfig) -> Self {
        Self::with_output(config, io::stdout())
    }
}

impl<W: Write> VM<W> {
    /// Create a VM that prints to `out`.
    pub fn with_output(config: VMConfig, out: W) -> Self {
        Self {
            stack: Vec::new(),
            fp: 0,
            pc: 0,
            frames: Vec::new(),
            call_marks: Vec::new(),
            collection_marks: Vec::new(),
            loops: Vec::new(),
            globals: Vec::new(),
            methods: config.methods,
            max_stack_depth: config.max_stack_depth,
            max_frame_depth: config.max_frame_depth,
            out,
        }
    }

    /// Execute an artifact until `HALT` or the first fatal error.
    pub fn run(&mut self, artifact: &Artifact) -> Result<(), VMError> {
        let global_count = artifact.global_count();
        if global_count > artifact.len() {
            return Err(VMError::InvalidSlot {
                slot: global_count as i64,
                pc: 0,
            });
        }
        self.stack.clear();
        self.frames.clear();
        self.call_marks.clear();
        self.collection_marks.clear();
        self.loops.clear();
        self.globals = vec![Value::Undef; global_count];
        self.fp = 0;
        self.pc = artifact.entry_point();

        log::debug!(
            "running {} byte artifact: entry {:#06x}, {} global(s)",
            artifact.len(),
            self.pc,
            global_count
        );
        let result = self.execute(artifact);
        match &result {
            Ok(()) => log::debug!("halted at {:#06x}", self.pc.saturating_sub(1)),
            Err(err) => log::debug!("run failed near {:#06x}: {}", self.pc, err),
        }
        let flushed = self.out.flush();
        result?;
        flushed?;
        Ok(())
    }

    /// Value of a global slot after a run.
    pub fn global(&self, slot: usize) -> Option<&Value> {
        self.globals.get(slot)
    }

    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    /// Operand stack contents; empty after a clean run.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Main execution loop.
    fn execute(&mut self, artifact: &Artifact) -> Result<(), VMError> {
        let code = artifact.as_bytes();
        loop {
            let at = self.pc;
            let byte = *code.get(at).ok_or(VMError::Truncated(at))?;
            let op = Op::from_byte(byte).ok_or(VMError::InvalidOpcode { byte, pc: at })?;
            log::trace!("{:04x}  {:<10} depth={}", at, op, self.stack.len());
            self.pc += 1;

            match op {
                // Control
                Op::Halt => return Ok(()),
                Op::Nop => {}
                Op::Print => {
                    let value = self.pop()?;
                    writeln!(self.out, "{}", value)?;
                }
                Op::Pop => {
                    self.pop()?;
                }
                Op::Dup => {
                    let value = self.peek()?.clone();
                    self.push(value)?;
                }

                // Constants
                Op::NConst => self.push(Value::Undef)?,
                Op::BConstF => self.push(Value::Bool(false))?,
                Op::BConstT => self.push(Value::Bool(true))?,
                Op::IConst => {
                    let n = self.read_operand(code)?;
                    self.push(Value::Int(n))?;
                }
                Op::DConst => {
                    let n = read_float(code, self.pc).ok_or(VMError::Truncated(at))?;
                    self.pc += OPERAND_WIDTH;
                    self.push(Value::Float(n))?;
                }
                Op::DConstN => self.push(Value::Float(f64::NAN))?,
                Op::DConstI => self.push(Value::Float(f64::INFINITY))?,
                Op::NewStr => {
                    let offset = self.read_offset(code)?;
                    let bytes = artifact.string_at(offset).ok_or(VMError::Truncated(offset))?;
                    self.push(Value::new_str(String::from_utf8_lossy(bytes).into_owned()))?;
                }
                Op::FConst => {
                    let offset = self.read_offset(code)?;
                    let params = *code.get(offset).ok_or(VMError::Truncated(offset))?;
                    let locals = *code.get(offset + 1).ok_or(VMError::Truncated(offset))?;
                    self.push(Value::Fn(Rc::new(Function {
                        offset,
                        params: params as usize,
                        locals: locals as usize,
                    })))?;
                }

                // Variables
                Op::GLoad => {
                    let slot = self.read_slot(code, at, self.globals.len())?;
                    let value = self.globals[slot].clone();
                    self.push(value)?;
                }
                Op::GStore => {
                    let slot = self.read_slot(code, at, self.globals.len())?;
                    self.globals[slot] = self.pop()?;
                }
                Op::LLoad => {
                    let slot = self.read_local(code, at)?;
                    let value = self.stack[slot].clone();
                    self.push(value)?;
                }
                Op::LStore => {
                    let value = self.pop()?;
                    let slot = self.read_local(code, at)?;
                    self.stack[slot] = value;
                }

                // Arithmetic, bitwise and comparison
                Op::Add
                | Op::Sub
                | Op::Mul
                | Op::FDiv
                | Op::IDiv
                | Op::Mod
                | Op::Exp
                | Op::BAnd
                | Op::BOr
                | Op::BXor
                | Op::BAndNot
                | Op::Bsl
                | Op::Bsr
                | Op::Gt
                | Op::Ge
                | Op::Cnct => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    let result = binary(op, &left, &right)?;
                    self.push(result)?;
                }
                Op::Eq => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    self.push(Value::Bool(left.equals(&right)))?;
                }
                Op::Id => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    self.push(Value::Bool(left.is_identical(&right)))?;
                }
                Op::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(!value.is_truthy()))?;
                }
                Op::Neg | Op::BNot | Op::Len => {
                    let value = self.pop()?;
                    let result = unary(op, &value)?;
                    self.push(result)?;
                }

                // Collections
                Op::End => self.collection_marks.push(self.stack.len()),
                Op::NewList => {
                    let items = self.take_collection()?;
                    self.push(Value::new_list(items))?;
                }
                Op::NewTable => {
                    let items = self.take_collection()?;
                    if items.len() % 2 != 0 {
                        return Err(VMError::Type("table literal needs key-value pairs".into()));
                    }
                    let mut table = Table::new();
                    let mut items = items.into_iter();
                    while let (Some(key), Some(value)) = (items.next(), items.next()) {
                        table.insert(hash_key(&key)?, value);
                    }
                    self.push(Value::new_table(table))?;
                }
                Op::Get => {
                    let key = self.pop()?;
                    let collection = self.pop()?;
                    let value = get(&collection, &key)?;
                    self.push(value)?;
                }
                Op::Set => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    let collection = self.pop()?;
                    set(&collection, &key, value.clone())?;
                    self.push(value)?;
                }

                // Branches
                Op::Br8 => {
                    let distance = self.read_operand(code)?;
                    self.jump(code, distance, at)?;
                }
                Op::Brf8 | Op::Brt8 | Op::Brn8 => {
                    let distance = self.read_operand(code)?;
                    let value = self.pop()?;
                    let taken = match op {
                        Op::Brf8 => !value.is_truthy(),
                        Op::Brt8 => value.is_truthy(),
                        _ => !value.is_undef(),
                    };
                    if taken {
                        self.jump(code, distance, at)?;
                    }
                }

                // Calls
                Op::InitCall => {
                    if self.stack.is_empty() {
                        return Err(VMError::StackUnderflow);
                    }
                    self.call_marks.push(self.stack.len() - 1);
                }
                Op::InitMCall => {
                    let offset = self.read_offset(code)?;
                    let name = artifact.string_at(offset).ok_or(VMError::Truncated(offset))?;
                    let name = String::from_utf8_lossy(name);
                    let receiver = self.pop()?;
                    let method = self.methods.get(receiver.kind(), &name).ok_or_else(|| {
                        VMError::MissingMethod {
                            kind: receiver.type_name(),
                            name: name.to_string(),
                        }
                    })?;
                    self.push(Value::Builtin(method))?;
                    self.call_marks.push(self.stack.len() - 1);
                    self.push(receiver)?;
                }
                Op::Call => self.call()?,
                Op::Ret => {
                    let value = self.pop()?;
                    let frame = self.frames.pop().ok_or(VMError::InvalidOpcode { byte, pc: at })?;
                    self.stack.truncate(frame.base);
                    self.loops.truncate(frame.loop_depth);
                    self.pc = frame.return_pc;
                    self.fp = frame.fp;
                    self.push(value)?;
                }

                // Iteration
                Op::InitFor => {
                    let value = self.pop()?;
                    let iter = LoopIter::new(&value).ok_or(VMError::UnaryType {
                        op: "for",
                        operand: value.type_name(),
                    })?;
                    self.loops.push(iter);
                }
                Op::Iter => {
                    let next = self
                        .loops
                        .last_mut()
                        .ok_or(VMError::StackUnderflow)?
                        .next();
                    match next {
                        Some(value) => {
                            self.push(value)?;
                            self.push(Value::Bool(true))?;
                        }
                        None => self.push(Value::Bool(false))?,
                    }
                }
                Op::EndFor | Op::EndComp => {
                    self.loops.pop().ok_or(VMError::StackUnderflow)?;
                }
            }
        }
    }

    // ===========================================================================
    // Stack Helpers
    // ===========================================================================

    fn push(&mut self, value: Value) -> Result<(), VMError> {
        if self.stack.len() >= self.max_stack_depth {
            return Err(VMError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VMError> {
        self.stack.pop().ok_or(VMError::StackUnderflow)
    }

    fn peek(&self) -> Result<&Value, VMError> {
        self.stack.last().ok_or(VMError::StackUnderflow)
    }

    /// Pop everything pushed since the matching `END`.
    fn take_collection(&mut self) -> Result<Vec<Value>, VMError> {
        let mark = self.collection_marks.pop().ok_or(VMError::StackUnderflow)?;
        if mark > self.stack.len() {
            return Err(VMError::StackUnderflow);
        }
        Ok(self.stack.split_off(mark))
    }

    // ===========================================================================
    // Operand Decoding
    // ===========================================================================

    fn read_operand(&mut self, code: &[u8]) -> Result<i64, VMError> {
        let value = read_int(code, self.pc).ok_or(VMError::Truncated(self.pc))?;
        self.pc += OPERAND_WIDTH;
        Ok(value)
    }

    fn read_offset(&mut self, code: &[u8]) -> Result<usize, VMError> {
        let at = self.pc;
        let value = self.read_operand(code)?;
        usize::try_from(value).map_err(|_| VMError::Truncated(at))
    }

    fn read_slot(&mut self, code: &[u8], at: usize, limit: usize) -> Result<usize, VMError> {
        let slot = self.read_operand(code)?;
        match usize::try_from(slot) {
            Ok(index) if index < limit => Ok(index),
            _ => Err(VMError::InvalidSlot { slot, pc: at }),
        }
    }

    /// Resolve a local slot operand to a stack index.
    fn read_local(&mut self, code: &[u8], at: usize) -> Result<usize, VMError> {
        let limit = self.stack.len().saturating_sub(self.fp);
        Ok(self.fp + self.read_slot(code, at, limit)?)
    }

    fn jump(&mut self, code: &[u8], distance: i64, at: usize) -> Result<(), VMError> {
        let target = self.pc as i64 + distance;
        if target < 0 || target as usize >= code.len() {
            return Err(VMError::Truncated(at));
        }
        self.pc = target as usize;
        Ok(())
    }

    // ===========================================================================
    // Calls
    // ===========================================================================

    fn call(&mut self) -> Result<(), VMError> {
        let mark = self.call_marks.pop().ok_or(VMError::StackUnderflow)?;
        let callee = self.stack.get(mark).cloned().ok_or(VMError::StackUnderflow)?;

        match callee {
            Value::Fn(function) => {
                if self.frames.len() >= self.max_frame_depth {
                    return Err(VMError::StackOverflow);
                }
                let fp = mark + 1;
                self.stack.truncate(fp + function.params);
                let frame_top = fp + function.locals.max(function.params);
                if frame_top > self.max_stack_depth {
                    return Err(VMError::StackOverflow);
                }
                self.stack.resize(frame_top, Value::Undef);
                self.frames.push(Frame {
                    return_pc: self.pc,
                    fp: self.fp,
                    base: mark,
                    loop_depth: self.loops.len(),
                });
                self.fp = fp;
                self.pc = function.entry();
            }
            Value::Builtin(builtin) => {
                let args = self.stack.split_off(mark + 1);
                self.stack.pop();
                let result = builtin.call(&args)?;
                self.push(result)?;
            }
            other => return Err(VMError::NotCallable(other.type_name())),
        }
        Ok(())
    }
}

// =============================================================================
// Operators
// =============================================================================

fn symbol(op: Op) -> &'static str {
    match op {
        Op::Add => "+",
        Op::Sub | Op::Neg => "-",
        Op::Mul => "*",
        Op::FDiv => "/",
        Op::IDiv => "//",
        Op::Mod => "%",
        Op::Exp => "**",
        Op::BAnd => "&",
        Op::BOr => "|",
        Op::BXor | Op::BNot => "^",
        Op::BAndNot => "&^",
        Op::Bsl => "<<",
        Op::Bsr => ">>",
        Op::Gt => ">",
        Op::Ge => ">=",
        Op::Cnct => "~",
        Op::Len => "len",
        other => other.mnemonic(),
    }
}

fn binary_type_error(op: Op, left: &Value, right: &Value) -> VMError {
    VMError::BinaryType {
        op: symbol(op),
        left: left.type_name(),
        right: right.type_name(),
    }
}

fn binary(op: Op, left: &Value, right: &Value) -> Result<Value, VMError> {
    match (op, left, right) {
        (Op::Cnct, Value::Str(a), Value::Str(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::new_str(s))
        }
        (Op::Gt | Op::Ge, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(if op == Op::Gt {
            a > b
        } else {
            a >= b
        })),
        (Op::Gt | Op::Ge, _, _) => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => Ok(Value::Bool(if op == Op::Gt { a > b } else { a >= b })),
            _ => Err(binary_type_error(op, left, right)),
        },
        (_, Value::Int(a), Value::Int(b)) => int_binary(op, *a, *b)
            .ok_or_else(|| binary_type_error(op, left, right))?,
        (Op::Add | Op::Sub | Op::Mul | Op::FDiv | Op::Mod | Op::Exp, _, _) => {
            match (as_number(left), as_number(right)) {
                (Some(a), Some(b)) => Ok(Value::Float(float_binary(op, a, b))),
                _ => Err(binary_type_error(op, left, right)),
            }
        }
        _ => Err(binary_type_error(op, left, right)),
    }
}

/// Integer arithmetic; `None` if `op` is not defined on ints.
fn int_binary(op: Op, a: i64, b: i64) -> Option<Result<Value, VMError>> {
    let value = match op {
        Op::Add => Value::Int(a.wrapping_add(b)),
        Op::Sub => Value::Int(a.wrapping_sub(b)),
        Op::Mul => Value::Int(a.wrapping_mul(b)),
        Op::FDiv => Value::Float(a as f64 / b as f64),
        Op::IDiv | Op::Mod if b == 0 => return Some(Err(VMError::DivisionByZero)),
        Op::IDiv => Value::Int(a.wrapping_div(b)),
        Op::Mod => Value::Int(a.wrapping_rem(b)),
        Op::Exp if b < 0 => Value::Float((a as f64).powf(b as f64)),
        Op::Exp => Value::Int(wrapping_pow(a, b as u64)),
        Op::BAnd => Value::Int(a & b),
        Op::BOr => Value::Int(a | b),
        Op::BXor => Value::Int(a ^ b),
        Op::BAndNot => Value::Int(a & !b),
        Op::Bsl => Value::Int(
            u32::try_from(b)
                .ok()
                .and_then(|s| a.checked_shl(s))
                .unwrap_or(0),
        ),
        Op::Bsr => Value::Int(
            u32::try_from(b)
                .ok()
                .and_then(|s| a.checked_shr(s))
                .unwrap_or(if a < 0 { -1 } else { 0 }),
        ),
        _ => return None,
    };
    Some(Ok(value))
}

/// `base ** exp` with wrapping overflow, for any non-negative exponent.
fn wrapping_pow(mut base: i64, mut exp: u64) -> i64 {
    let mut acc: i64 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    acc
}

fn float_binary(op: Op, a: f64, b: f64) -> f64 {
    match op {
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Mod => a % b,
        Op::Exp => a.powf(b),
        _ => a / b,
    }
}

fn unary(op: Op, value: &Value) -> Result<Value, VMError> {
    let result = match (op, value) {
        (Op::Neg, Value::Int(n)) => Value::Int(n.wrapping_neg()),
        (Op::Neg, Value::Float(n)) => Value::Float(-n),
        (Op::BNot, Value::Int(n)) => Value::Int(!n),
        (Op::Len, Value::Str(s)) => Value::Int(s.len() as i64),
        (Op::Len, Value::List(items)) => Value::Int(items.borrow().len() as i64),
        (Op::Len, Value::Table(table)) => Value::Int(table.borrow().len() as i64),
        _ => {
            return Err(VMError::UnaryType {
                op: symbol(op),
                operand: value.type_name(),
            })
        }
    };
    Ok(result)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        _ => None,
    }
}

fn hash_key(value: &Value) -> Result<Key, VMError> {
    Key::from_value(value)
        .ok_or_else(|| VMError::Type(format!("unhashable key of type {}", value.type_name())))
}

/// Resolve a possibly negative index against `len`.
fn list_index(index: i64, len: usize) -> Result<usize, VMError> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved as usize >= len {
        return Err(VMError::Index { index, len });
    }
    Ok(resolved as usize)
}

fn get(collection: &Value, key: &Value) -> Result<Value, VMError> {
    match (collection, key) {
        (Value::List(items), Value::Int(index)) => {
            let items = items.borrow();
            Ok(items[list_index(*index, items.len())?].clone())
        }
        (Value::Str(s), Value::Int(index)) => {
            let byte = s.as_bytes()[list_index(*index, s.len())?];
            Ok(Value::from_byte(byte))
        }
        (Value::Table(table), _) => {
            let key = hash_key(key)?;
            Ok(table.borrow().get(&key).cloned().unwrap_or(Value::Undef))
        }
        _ => Err(binary_type_error_named("[]", collection, key)),
    }
}

fn set(collection: &Value, key: &Value, value: Value) -> Result<(), VMError> {
    match (collection, key) {
        (Value::List(items), Value::Int(index)) => {
            let mut items = items.borrow_mut();
            let index = list_index(*index, items.len())?;
            items[index] = value;
            Ok(())
        }
        (Value::Table(table), _) => {
            let key = hash_key(key)?;
            table.borrow_mut().insert(key, value);
            Ok(())
        }
        _ => Err(binary_type_error_named("[]=", collection, key)),
    }
}

fn binary_type_error_named(op: &'static str, left: &Value, right: &Value) -> VMError {
    VMError::BinaryType {
        op,
        left: left.type_name(),
        right: right.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yasl_bytecode::ByteBuffer;
    use yasl_compiler::compile;

    fn run_source(source: &str) -> (Result<(), VMError>, VM<Vec<u8>>) {
        let artifact =
            compile(source).unwrap_or_else(|e| panic!("compilation of {:?} failed: {}", source, e));
        let mut vm = VM::with_output(VMConfig::default(), Vec::new());
        let result = vm.run(&artifact);
        (result, vm)
    }

    fn output(source: &str) -> String {
        let (result, vm) = run_source(source);
        if let Err(err) = result {
            panic!("running {:?} failed: {}", source, err);
        }
        String::from_utf8(vm.into_output()).unwrap()
    }

    fn run_err(source: &str) -> VMError {
        match run_source(source).0 {
            Ok(()) => panic!("expected {:?} to fail", source),
            Err(err) => err,
        }
    }

    // =========================================================================
    // Arithmetic and Comparison
    // =========================================================================

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(output("echo 1 + 2 * 3;"), "7\n");
        assert_eq!(output("echo 7 // 2; echo 7 % 3; echo -7 // 2;"), "3\n1\n-3\n");
        assert_eq!(output("echo 2 ** 10; echo 2 ** -1;"), "1024\n0.5\n");
        assert_eq!(output("echo 9223372036854775807 + 1;"), "-9223372036854775808\n");
        assert_eq!(output("echo -9223372036854775808;"), "-9223372036854775808\n");
    }

    #[test]
    fn test_large_exponents_stay_integers() {
        assert_eq!(output("echo 2 ** 63; echo 2 ** 64;"), "-9223372036854775808\n0\n");
        assert_eq!(output("echo 2 ** 4294967296;"), "0\n");
        assert_eq!(
            output("m := -1; echo m ** 4294967296; echo m ** 4294967297;"),
            "1\n-1\n"
        );
        assert_eq!(output("echo 1 ** 9223372036854775807; echo 0 ** 0;"), "1\n1\n");
    }

    #[test]
    fn test_float_arithmetic() {
        assert_eq!(output("echo 10 / 4;"), "2.5\n");
        assert_eq!(output("echo 4 / 2;"), "2.0\n");
        assert_eq!(output("echo 1 + 0.5;"), "1.5\n");
        assert_eq!(output("echo 1 / 0;"), "inf\n");
        assert_eq!(output("echo -inf; echo nan;"), "-inf\nnan\n");
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(output("echo 6 & 3; echo 6 | 3; echo 6 ^ 3;"), "2\n7\n5\n");
        assert_eq!(output("echo 6 &^ 3; echo ^0; echo 1 << 4; echo -16 >> 2;"), "4\n-1\n16\n-4\n");
    }

    #[test]
    fn test_comparison_and_equality() {
        assert_eq!(output("echo 1 < 2; echo 2 <= 1; echo 1.5 > 1;"), "true\nfalse\ntrue\n");
        assert_eq!(output("echo 1 == 1.0; echo 1 === 1.0;"), "true\nfalse\n");
        assert_eq!(output("echo [1, 2] == [1, 2]; echo [1] === [1];"), "true\nfalse\n");
        assert_eq!(output("x := [1]; echo x === x; echo x !== x;"), "true\nfalse\n");
        assert_eq!(output("echo nan == nan;"), "false\n");
    }

    #[test]
    fn test_truthiness_and_logic() {
        assert_eq!(output("echo !''; echo !0; echo !nan;"), "true\nfalse\ntrue\n");
        assert_eq!(output("echo 0 or 5; echo '' or 5; echo 1 and 2;"), "0\n5\n2\n");
        assert_eq!(output("echo undef ?? 3; echo false ?? 3;"), "3\nfalse\n");
        assert_eq!(output("echo true ? 'y' : 'n';"), "y\n");
    }

    #[test]
    fn test_type_errors() {
        assert_eq!(
            run_err("echo 1 + 'a';").to_string(),
            "TypeError: + not supported for operands of types int and str."
        );
        assert_eq!(
            run_err("echo -'a';").to_string(),
            "TypeError: - not supported for operand of type str."
        );
        assert!(matches!(run_err("echo 1.5 // 2;"), VMError::BinaryType { op: "//", .. }));
        assert!(matches!(run_err("echo 1 ~ 2;"), VMError::BinaryType { op: "~", .. }));
        assert!(matches!(run_err("echo 1 < 'a';"), VMError::BinaryType { op: ">=", .. }));
        assert!(matches!(run_err("echo 1 // 0;"), VMError::DivisionByZero));
        assert!(matches!(run_err("echo 1 % 0;"), VMError::DivisionByZero));
    }

    #[test]
    fn test_strings() {
        assert_eq!(output("echo 'ab' ~ 'cd'; echo len 'héllo';"), "abcd\n6\n");
        assert_eq!(output("echo 'abc'[1]; echo 'abc'[-1];"), "b\nc\n");
    }

    // =========================================================================
    // Collections
    // =========================================================================

    #[test]
    fn test_lists() {
        assert_eq!(output("x := [1, 2, 3]; echo x[0]; echo x[-1]; echo len x;"), "1\n3\n3\n");
        assert_eq!(output("x := [1, 2]; x[0] = 'a'; echo x;"), "[a, 2]\n");
        assert!(matches!(run_err("echo [1][5];"), VMError::Index { index: 5, len: 1 }));
        assert!(matches!(run_err("x := [1]; x[-2] = 0;"), VMError::Index { .. }));
    }

    #[test]
    fn test_tables() {
        assert_eq!(output("t := ['a' -> 1]; echo t['a']; echo t['b'];"), "1\nundef\n");
        assert_eq!(output("t := [->]; t.x = 5; t[1.0] = 2; echo t[1]; echo t;"), "2\n[1 -> 2, x -> 5]\n");
        assert!(matches!(run_err("t := [->]; t[[]] = 1;"), VMError::Type(_)));
    }

    #[test]
    fn test_set_returns_value() {
        assert_eq!(output("x := [0]; echo x[0] = 7;"), "7\n");
    }

    // =========================================================================
    // Control Flow
    // =========================================================================

    #[test]
    fn test_while_loop() {
        let src = "let i = 0; while i < 3 { echo i; i += 1; }";
        assert_eq!(output(src), "0\n1\n2\n");
    }

    #[test]
    fn test_c_style_for_with_break_and_continue() {
        let src = "for i := 0; i < 10; i += 1 { if i == 1 { continue; } if i == 3 { break; } echo i; }";
        assert_eq!(output(src), "0\n2\n");
    }

    #[test]
    fn test_for_iter() {
        assert_eq!(output("for let x <- [1, 2] { echo x * 10; }"), "10\n20\n");
        assert_eq!(output("for let k <- ['b' -> 1, 'a' -> 2] { echo k; }"), "a\nb\n");
        assert_eq!(output("for let c <- 'hi' { echo c; }"), "h\ni\n");
        assert!(matches!(run_err("for let x <- 5 { }"), VMError::UnaryType { op: "for", .. }));
    }

    #[test]
    fn test_string_iteration_matches_len() {
        let src = "s := 'hé'; n := 0; for let c <- s { n += 1; } echo n; echo len s; echo s[0];";
        assert_eq!(output(src), "3\n3\nh\n");
    }

    #[test]
    fn test_nested_continue_targets_inner_loop() {
        let src = "for let x <- [1, 2, 3] {
            if x == 2 { continue; }
            for let y <- [1, 2, 3] {
                if y == 2 { continue; }
                echo x * 10 + y;
            }
        }";
        assert_eq!(output(src), "11\n13\n31\n33\n");

        let src = "i := 0; while i < 2 {
            i += 1;
            for j := 0; j < 3; j += 1 {
                if j == 1 { continue; }
                echo i * 10 + j;
            }
            continue;
            echo 'unreachable';
        }";
        assert_eq!(output(src), "10\n12\n20\n22\n");
    }

    #[test]
    fn test_nested_break_leaves_stack_clean() {
        let src = "for let x <- [1, 2] { for let y <- [1, 2, 3] { if y == 2 { break; } echo x; } }";
        let (result, vm) = run_source(src);
        assert!(result.is_ok());
        assert!(vm.stack().is_empty());
        assert_eq!(String::from_utf8(vm.into_output()).unwrap(), "1\n2\n");
    }

    #[test]
    fn test_comprehensions() {
        assert_eq!(output("echo [x * x for x <- [1, 2, 3]];"), "[1, 4, 9]\n");
        assert_eq!(output("echo [x for x <- [1, 2, 3, 4] if x % 2 == 0];"), "[2, 4]\n");
        assert_eq!(output("echo [x -> x * 2 for x <- [1, 2]];"), "[1 -> 2, 2 -> 4]\n");
        assert_eq!(output("echo [[y for y <- [x, x]] for x <- [1, 2]];"), "[[1, 1], [2, 2]]\n");
    }

    // =========================================================================
    // Functions
    // =========================================================================

    #[test]
    fn test_function_call_and_recursion() {
        let src = "fn fact(n) { if n <= 1 { return 1; } return n * fact(n - 1); } echo fact(10);";
        assert_eq!(output(src), "3628800\n");
    }

    #[test]
    fn test_argument_padding_and_truncation() {
        let src = "fn f(a, b) { echo a; echo b; } f(1); f(1, 2, 3);";
        assert_eq!(output(src), "1\nundef\n1\n2\n");
    }

    #[test]
    fn test_implicit_return_is_undef() {
        assert_eq!(output("fn f() { } echo f();"), "undef\n");
    }

    #[test]
    fn test_return_from_inside_loop() {
        let src = "fn find(xs, t) { for let x <- xs { if x == t { return x; } } return -1; }
                   echo find([4, 5], 5); echo find([4], 9);";
        let (result, vm) = run_source(src);
        assert!(result.is_ok());
        assert!(vm.stack().is_empty());
        assert_eq!(String::from_utf8(vm.into_output()).unwrap(), "5\n-1\n");
    }

    #[test]
    fn test_locals_in_nested_blocks() {
        let src = "fn f(a) { let b = a + 1; { let c = b * 2; return c; } } echo f(1);";
        assert_eq!(output(src), "4\n");
    }

    #[test]
    fn test_call_non_function() {
        assert!(matches!(run_err("x := 1; x();"), VMError::NotCallable("int")));
    }

    #[test]
    fn test_frame_limit() {
        let artifact = compile("fn f() { return f(); } f();").unwrap();
        let config = VMConfig {
            max_frame_depth: 16,
            ..VMConfig::default()
        };
        let mut vm = VM::with_output(config, Vec::new());
        assert!(matches!(vm.run(&artifact), Err(VMError::StackOverflow)));
    }

    // =========================================================================
    // Methods
    // =========================================================================

    #[test]
    fn test_method_calls() {
        assert_eq!(output("echo 'abc'.upcase();"), "ABC\n");
        assert_eq!(output("x := []; x.push(1).push(2); echo x;"), "[1, 2]\n");
        assert_eq!(output("n := 10; echo n.tostr() ~ '!';"), "10!\n");
        assert!(matches!(
            run_err("n := 1; echo n.upcase();"),
            VMError::MissingMethod { kind: "int", .. }
        ));
        assert!(matches!(
            run_err("echo 'a'.startswith();"),
            VMError::ArgumentCount { .. }
        ));
    }

    // =========================================================================
    // Reference Counting
    // =========================================================================

    #[test]
    fn test_reference_counts() {
        let (result, vm) = run_source("x := [1]; y := x; z := [2];");
        assert!(result.is_ok());
        assert_eq!(vm.global(0).and_then(Value::strong_count), Some(2));
        assert_eq!(vm.global(2).and_then(Value::strong_count), Some(1));
    }

    #[test]
    fn test_deeply_nested_list_released() {
        let src = "x := []; for i := 0; i < 100000; i += 1 { x = [x]; } x = 0; echo 'done';";
        assert_eq!(output(src), "done\n");
    }

    #[test]
    fn test_cyclic_lists_compare_equal() {
        let src = "x := []; x.push(x); y := []; y.push(y); echo x == y; echo x === y;";
        assert_eq!(output(src), "true\nfalse\n");
        let src = "x := [1]; x.push(x); y := [2]; y.push(y); echo x == y;";
        assert_eq!(output(src), "false\n");
    }

    #[test]
    fn test_overwrite_releases_value() {
        let (result, vm) = run_source("x := [1]; y := x; x = 0;");
        assert!(result.is_ok());
        assert_eq!(vm.global(1).and_then(Value::strong_count), Some(1));
    }

    // =========================================================================
    // Malformed Artifacts
    // =========================================================================

    fn raw_artifact(code: &[u8]) -> Artifact {
        Artifact::assemble(vec![0; 16], code)
    }

    #[test]
    fn test_invalid_opcode() {
        let mut vm = VM::with_output(VMConfig::default(), Vec::new());
        assert!(matches!(
            vm.run(&raw_artifact(&[0xEE])),
            Err(VMError::InvalidOpcode { byte: 0xEE, pc: 16 })
        ));
    }

    #[test]
    fn test_truncated_operand_and_bad_slot() {
        let mut vm = VM::with_output(VMConfig::default(), Vec::new());
        let mut code = ByteBuffer::new();
        code.add_op(Op::GLoad);
        code.add_int(3);
        assert!(matches!(
            vm.run(&raw_artifact(code.as_bytes())),
            Err(VMError::InvalidSlot { slot: 3, .. })
        ));
        assert!(matches!(
            vm.run(&raw_artifact(&[Op::Pop as u8])),
            Err(VMError::StackUnderflow)
        ));
    }
}
