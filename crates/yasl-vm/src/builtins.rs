//! Built-in methods for YASL values.
//!
//! Methods are looked up by the receiver's [`ValueKind`] and name. The
//! receiver is passed as the first argument.

use std::collections::HashMap;
use std::rc::Rc;

use crate::value::{Builtin, BuiltinFn, Key, Table, Value, ValueKind};
use crate::vm::VMError;

/// Builtin methods keyed by receiver kind and name.
#[derive(Debug, Default)]
pub struct MethodTable {
    methods: HashMap<ValueKind, HashMap<String, Rc<Builtin>>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method taking `arity` arguments besides the receiver.
    pub fn register(&mut self, kind: ValueKind, name: &str, arity: usize, func: BuiltinFn) {
        let qualified = format!("{}.{}", kind.name(), name);
        self.methods
            .entry(kind)
            .or_default()
            .insert(name.to_string(), Rc::new(Builtin::new(qualified, arity + 1, func)));
    }

    pub fn get(&self, kind: ValueKind, name: &str) -> Option<Rc<Builtin>> {
        self.methods.get(&kind)?.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.methods.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Create the standard method table.
pub fn create_builtins() -> MethodTable {
    let mut table = MethodTable::new();

    for kind in [
        ValueKind::Undef,
        ValueKind::Bool,
        ValueKind::Int,
        ValueKind::Float,
        ValueKind::Str,
        ValueKind::List,
        ValueKind::Table,
        ValueKind::Fn,
    ] {
        table.register(kind, "tostr", 0, |args| {
            Ok(Value::new_str(args[0].to_string()))
        });
    }

    // Numbers
    table.register(ValueKind::Int, "tofloat", 0, |args| match &args[0] {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        other => Err(type_error("int.tofloat", "int", other)),
    });
    table.register(ValueKind::Float, "toint", 0, |args| match &args[0] {
        Value::Float(n) => Ok(Value::Int(*n as i64)),
        other => Err(type_error("float.toint", "float", other)),
    });

    // Strings
    table.register(ValueKind::Str, "upcase", 0, |args| {
        let s = expect_str("str.upcase", &args[0])?;
        Ok(Value::new_str(s.to_uppercase()))
    });
    table.register(ValueKind::Str, "downcase", 0, |args| {
        let s = expect_str("str.downcase", &args[0])?;
        Ok(Value::new_str(s.to_lowercase()))
    });
    table.register(ValueKind::Str, "startswith", 1, |args| {
        let s = expect_str("str.startswith", &args[0])?;
        let prefix = expect_str("str.startswith", &args[1])?;
        Ok(Value::Bool(s.starts_with(prefix.as_ref())))
    });
    table.register(ValueKind::Str, "endswith", 1, |args| {
        let s = expect_str("str.endswith", &args[0])?;
        let suffix = expect_str("str.endswith", &args[1])?;
        Ok(Value::Bool(s.ends_with(suffix.as_ref())))
    });
    table.register(ValueKind::Str, "split", 1, |args| {
        let s = expect_str("str.split", &args[0])?;
        let sep = expect_str("str.split", &args[1])?;
        if sep.is_empty() {
            return Err(VMError::Type("str.split expected a non-empty separator".to_string()));
        }
        let parts = s.split(sep.as_ref()).map(Value::from).collect();
        Ok(Value::new_list(parts))
    });
    table.register(ValueKind::Str, "replace", 2, |args| {
        let s = expect_str("str.replace", &args[0])?;
        let from = expect_str("str.replace", &args[1])?;
        let to = expect_str("str.replace", &args[2])?;
        if from.is_empty() {
            return Err(VMError::Type("str.replace expected a non-empty pattern".to_string()));
        }
        Ok(Value::new_str(s.replace(from.as_ref(), to.as_ref())))
    });
    table.register(ValueKind::Str, "toint", 0, |args| {
        let s = expect_str("str.toint", &args[0])?;
        Ok(s.trim().parse::<i64>().map_or(Value::Undef, Value::Int))
    });
    table.register(ValueKind::Str, "tofloat", 0, |args| {
        let s = expect_str("str.tofloat", &args[0])?;
        Ok(s.trim().parse::<f64>().map_or(Value::Undef, Value::Float))
    });

    // Lists
    table.register(ValueKind::List, "push", 1, |args| {
        let Value::List(items) = &args[0] else {
            return Err(type_error("list.push", "list", &args[0]));
        };
        items.borrow_mut().push(args[1].clone());
        Ok(args[0].clone())
    });
    table.register(ValueKind::List, "pop", 0, |args| {
        let Value::List(items) = &args[0] else {
            return Err(type_error("list.pop", "list", &args[0]));
        };
        items
            .borrow_mut()
            .pop()
            .ok_or(VMError::Index { index: -1, len: 0 })
    });
    table.register(ValueKind::List, "extend", 1, |args| {
        let Value::List(items) = &args[0] else {
            return Err(type_error("list.extend", "list", &args[0]));
        };
        let Value::List(other) = &args[1] else {
            return Err(type_error("list.extend", "list", &args[1]));
        };
        let extra = other.borrow().to_vec();
        items.borrow_mut().extend(extra);
        Ok(args[0].clone())
    });
    table.register(ValueKind::List, "copy", 0, |args| match &args[0] {
        Value::List(items) => Ok(Value::new_list(items.borrow().to_vec())),
        other => Err(type_error("list.copy", "list", other)),
    });

    // Tables
    table.register(ValueKind::Table, "keys", 0, |args| match &args[0] {
        Value::Table(t) => Ok(Value::new_list(t.borrow().keys())),
        other => Err(type_error("table.keys", "table", other)),
    });
    table.register(ValueKind::Table, "values", 0, |args| match &args[0] {
        Value::Table(t) => Ok(Value::new_list(t.borrow().values())),
        other => Err(type_error("table.values", "table", other)),
    });
    table.register(ValueKind::Table, "copy", 0, |args| match &args[0] {
        Value::Table(t) => Ok(Value::new_table(Table::clone(&t.borrow()))),
        other => Err(type_error("table.copy", "table", other)),
    });
    table.register(ValueKind::Table, "remove", 1, |args| {
        let Value::Table(t) = &args[0] else {
            return Err(type_error("table.remove", "table", &args[0]));
        };
        let key = Key::from_value(&args[1]).ok_or_else(|| {
            VMError::Type(format!("unhashable key of type {}", args[1].type_name()))
        })?;
        Ok(t.borrow_mut().remove(&key).unwrap_or(Value::Undef))
    });

    table
}

fn type_error(method: &str, expected: &str, got: &Value) -> VMError {
    VMError::Type(format!(
        "{} expected {}, got {}",
        method,
        expected,
        got.type_name()
    ))
}

fn expect_str<'a>(method: &str, value: &'a Value) -> Result<&'a Rc<str>, VMError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(type_error(method, "str", other)),
    }
}
