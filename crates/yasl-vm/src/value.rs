//! YASL runtime values.
//!
//! Heap values are reference counted with `Rc` and freed as soon as their
//! last strong reference is dropped. A container that holds itself is never
//! reclaimed.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::vm::VMError;

/// Runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Undef,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<List>>),
    Table(Rc<RefCell<Table>>),
    Fn(Rc<Function>),
    Builtin(Rc<Builtin>),
}

/// Coarse type of a value, used to key builtin methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Undef,
    Bool,
    Int,
    Float,
    Str,
    List,
    Table,
    Fn,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Undef => "undef",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "str",
            ValueKind::List => "list",
            ValueKind::Table => "table",
            ValueKind::Fn => "fn",
        }
    }
}

impl Value {
    pub fn new_str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn new_list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(List::from(items))))
    }

    /// A one-byte string. Bytes that are not ASCII become U+FFFD.
    pub fn from_byte(byte: u8) -> Self {
        Value::new_str(String::from_utf8_lossy(&[byte]).into_owned())
    }

    pub fn new_table(table: Table) -> Self {
        Value::Table(Rc::new(RefCell::new(table)))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Undef => ValueKind::Undef,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
            Value::Table(_) => ValueKind::Table,
            Value::Fn(_) | Value::Builtin(_) => ValueKind::Fn,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// `undef`, `false`, `""` and NaN are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undef => false,
            Value::Bool(b) => *b,
            Value::Float(n) => !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Value::Undef)
    }

    /// Structural equality. Ints and floats compare numerically.
    ///
    /// Containers that (transitively) hold themselves compare equal when
    /// their shapes match.
    pub fn equals(&self, other: &Value) -> bool {
        self.equals_in(other, &mut Vec::new())
    }

    fn equals_in(&self, other: &Value, open: &mut Vec<(*const (), *const ())>) -> bool {
        match (self, other) {
            (Value::Undef, Value::Undef) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ());
                if open.contains(&pair) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return false;
                }
                open.push(pair);
                let equal = a.iter().zip(b.iter()).all(|(x, y)| x.equals_in(y, open));
                open.pop();
                equal
            }
            (Value::Table(a), Value::Table(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ());
                if open.contains(&pair) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return false;
                }
                open.push(pair);
                let equal = a
                    .entries
                    .iter()
                    .all(|(k, v)| b.entries.get(k).is_some_and(|bv| v.equals_in(bv, open)));
                open.pop();
                equal
            }
            _ => self.is_identical(other),
        }
    }

    /// Identity: the same primitive value or the same heap allocation.
    /// Strings are immutable and compare by content.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undef, Value::Undef) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Fn(a), Value::Fn(b)) => a.offset == b.offset,
            (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Strong reference count of a heap value, `None` for primitives.
    pub fn strong_count(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(Rc::strong_count(s)),
            Value::List(l) => Some(Rc::strong_count(l)),
            Value::Table(t) => Some(Rc::strong_count(t)),
            Value::Fn(f) => Some(Rc::strong_count(f)),
            Value::Builtin(b) => Some(Rc::strong_count(b)),
            _ => None,
        }
    }

    /// Weak reference count of a heap value, for diagnostics.
    pub fn weak_count(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(Rc::weak_count(s)),
            Value::List(l) => Some(Rc::weak_count(l)),
            Value::Table(t) => Some(Rc::weak_count(t)),
            Value::Fn(f) => Some(Rc::weak_count(f)),
            Value::Builtin(b) => Some(Rc::weak_count(b)),
            _ => None,
        }
    }

    fn heap_ptr(&self) -> Option<*const ()> {
        match self {
            Value::List(l) => Some(Rc::as_ptr(l) as *const ()),
            Value::Table(t) => Some(Rc::as_ptr(t) as *const ()),
            _ => None,
        }
    }

    /// Write a value, printing `[...]` for a container already being written.
    fn write(&self, f: &mut fmt::Formatter<'_>, open: &mut Vec<*const ()>) -> fmt::Result {
        let Some(ptr) = self.heap_ptr() else {
            return self.write_contents(f, open);
        };
        if open.contains(&ptr) {
            return f.write_str("[...]");
        }
        open.push(ptr);
        let result = self.write_contents(f, open);
        open.pop();
        result
    }

    fn write_contents(&self, f: &mut fmt::Formatter<'_>, open: &mut Vec<*const ()>) -> fmt::Result {
        match self {
            Value::Undef => f.write_str("undef"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => f.write_str(&format_float(*n)),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.write(f, open)?;
                }
                f.write_str("]")
            }
            Value::Table(table) => {
                let table = table.borrow();
                if table.is_empty() {
                    return f.write_str("[->]");
                }
                f.write_str("[")?;
                for (i, (key, value)) in table.entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} -> ", key)?;
                    value.write(f, open)?;
                }
                f.write_str("]")
            }
            Value::Fn(func) => write!(f, "<fn@{}>", func.offset),
            Value::Builtin(builtin) => write!(f, "<fn {}>", builtin.name),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, &mut Vec::new())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

/// Floats with a whole value keep a trailing `.0`.
pub fn format_float(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

// =============================================================================
// Lists
// =============================================================================

/// List storage.
///
/// Dropping a list frees nested containers with an explicit work list, so
/// deeply nested values do not exhaust the native stack.
#[derive(Debug, Clone, Default)]
pub struct List {
    items: Vec<Value>,
}

impl List {
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<Vec<Value>> for List {
    fn from(items: Vec<Value>) -> Self {
        List { items }
    }
}

impl Deref for List {
    type Target = Vec<Value>;

    fn deref(&self) -> &Vec<Value> {
        &self.items
    }
}

impl DerefMut for List {
    fn deref_mut(&mut self) -> &mut Vec<Value> {
        &mut self.items
    }
}

impl Drop for List {
    fn drop(&mut self) {
        release(mem::take(&mut self.items));
    }
}

/// Drop values, unpacking containers whose last reference is going away
/// onto `pending` instead of recursing into them.
fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::List(list) => {
                if let Ok(cell) = Rc::try_unwrap(list) {
                    pending.append(&mut cell.into_inner().items);
                }
            }
            Value::Table(table) => {
                if let Ok(cell) = Rc::try_unwrap(table) {
                    pending.extend(mem::take(&mut cell.into_inner().entries).into_values());
                }
            }
            _ => {}
        }
    }
}

// =============================================================================
// Tables
// =============================================================================

/// A hashable table key.
///
/// Whole floats are normalized to ints so `t[1]` and `t[1.0]` agree with
/// numeric equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Key {
    Undef,
    Bool(bool),
    Int(i64),
    Float(FloatKey),
    Str(Rc<str>),
}

/// Total ordering over floats for use as a key.
#[derive(Debug, Clone, Copy)]
pub struct FloatKey(pub f64);

impl PartialEq for FloatKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for FloatKey {}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Key {
    /// Convert a value to a key; lists, tables and functions are unhashable.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Undef => Some(Key::Undef),
            Value::Bool(b) => Some(Key::Bool(*b)),
            Value::Int(n) => Some(Key::Int(*n)),
            Value::Float(n) => {
                if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n < i64::MAX as f64 {
                    Some(Key::Int(*n as i64))
                } else {
                    Some(Key::Float(FloatKey(*n)))
                }
            }
            Value::Str(s) => Some(Key::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Undef => Value::Undef,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(n) => Value::Int(*n),
            Key::Float(n) => Value::Float(n.0),
            Key::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Table storage with deterministic key order.
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: BTreeMap<Key, Value>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: Key, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.keys().map(Key::to_value).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().cloned().collect()
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        release(mem::take(&mut self.entries).into_values().collect());
    }
}

// =============================================================================
// Functions
// =============================================================================

/// A compiled function chunk in the artifact header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Header offset of the chunk's parameter-count byte.
    pub offset: usize,
    pub params: usize,
    pub locals: usize,
}

impl Function {
    /// Offset of the first body instruction.
    pub fn entry(&self) -> usize {
        self.offset + 2
    }
}

/// Native function signature. Methods receive their receiver first.
pub type BuiltinFn = fn(&[Value]) -> Result<Value, VMError>;

/// A native function with a fixed number of arguments.
pub struct Builtin {
    pub name: String,
    /// Argument count, receiver included.
    pub arity: usize,
    func: BuiltinFn,
}

impl Builtin {
    pub fn new(name: impl Into<String>, arity: usize, func: BuiltinFn) -> Self {
        Self {
            name: name.into(),
            arity,
            func,
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, VMError> {
        if args.len() != self.arity {
            return Err(VMError::ArgumentCount {
                name: self.name.clone(),
                expected: self.arity,
                got: args.len(),
            });
        }
        (self.func)(args)
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin {{ name: {}, arity: {} }}", self.name, self.arity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undef.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Float(f64::NAN).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::Float(0.0).is_truthy());
        assert!(Value::new_list(vec![]).is_truthy());
    }

    #[test]
    fn test_equality_and_identity() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(!Value::Int(1).is_identical(&Value::Float(1.0)));

        let a = Value::new_list(vec![Value::Int(1), Value::from("x")]);
        let b = Value::new_list(vec![Value::Int(1), Value::from("x")]);
        assert!(a.equals(&b));
        assert!(!a.is_identical(&b));
        assert!(a.is_identical(&a.clone()));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(10.0).to_string(), "10.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Float(f64::NEG_INFINITY).to_string(), "-inf");
        assert_eq!(Value::Float(f64::NAN).to_string(), "nan");
        assert_eq!(
            Value::new_list(vec![Value::Int(1), Value::Undef]).to_string(),
            "[1, undef]"
        );
        assert_eq!(Value::new_table(Table::new()).to_string(), "[->]");

        let mut table = Table::new();
        table.insert(Key::Str("a".into()), Value::Int(1));
        assert_eq!(Value::new_table(table).to_string(), "[a -> 1]");
    }

    #[test]
    fn test_display_self_reference() {
        let list = Value::new_list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.to_string(), "[1, [...]]");
        if let Value::List(items) = &list {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_cyclic_equality_terminates() {
        let cyclic = |head: i64| {
            let list = Value::new_list(vec![Value::Int(head)]);
            if let Value::List(items) = &list {
                items.borrow_mut().push(list.clone());
            }
            list
        };
        let (a, b, c) = (cyclic(1), cyclic(1), cyclic(2));
        assert!(a.equals(&b));
        assert!(!a.equals(&c));

        let table = |head: i64| {
            let mut t = Table::new();
            t.insert(Key::Int(0), Value::Int(head));
            let t = Value::new_table(t);
            if let Value::Table(inner) = &t {
                inner.borrow_mut().insert(Key::Int(1), t.clone());
            }
            t
        };
        let (x, y, z) = (table(1), table(1), table(2));
        assert!(x.equals(&y));
        assert!(!x.equals(&z));

        for value in [a, b, c] {
            if let Value::List(items) = &value {
                items.borrow_mut().clear();
            }
        }
        for value in [x, y, z] {
            if let Value::Table(inner) = &value {
                inner.borrow_mut().remove(&Key::Int(1));
            }
        }
    }

    #[test]
    fn test_deep_nesting_drops_iteratively() {
        let mut list = Value::new_list(vec![]);
        for _ in 0..100_000 {
            list = Value::new_list(vec![list]);
        }
        drop(list);

        let mut table = Value::new_table(Table::new());
        for _ in 0..100_000 {
            let mut t = Table::new();
            t.insert(Key::Int(0), table);
            table = Value::new_table(t);
        }
        drop(table);
    }

    #[test]
    fn test_release_keeps_shared_children() {
        let shared = Value::new_list(vec![Value::Int(7)]);
        let outer = Value::new_list(vec![Value::new_list(vec![shared.clone()])]);
        assert_eq!(shared.strong_count(), Some(2));
        drop(outer);
        assert_eq!(shared.strong_count(), Some(1));
        assert_eq!(shared.to_string(), "[7]");
    }

    #[test]
    fn test_keys_normalize_whole_floats() {
        assert_eq!(Key::from_value(&Value::Float(2.0)), Some(Key::Int(2)));
        assert_eq!(
            Key::from_value(&Value::Float(2.5)),
            Some(Key::Float(FloatKey(2.5)))
        );
        assert_eq!(Key::from_value(&Value::new_list(vec![])), None);
    }

    #[test]
    fn test_reference_counts() {
        let list = Value::new_list(vec![]);
        assert_eq!(list.strong_count(), Some(1));
        let copy = list.clone();
        assert_eq!(list.strong_count(), Some(2));
        drop(copy);
        assert_eq!(list.strong_count(), Some(1));
        assert_eq!(list.weak_count(), Some(0));
        assert_eq!(Value::Int(3).strong_count(), None);
    }

    #[test]
    fn test_builtin_arity() {
        let builtin = Builtin::new("id", 1, |args| Ok(args[0].clone()));
        assert!(matches!(builtin.call(&[Value::Int(1)]), Ok(Value::Int(1))));
        assert!(matches!(
            builtin.call(&[]),
            Err(VMError::ArgumentCount { expected: 1, got: 0, .. })
        ));
    }
}
