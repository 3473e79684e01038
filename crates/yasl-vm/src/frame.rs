//! Call frames and loop iterators for the YASL VM.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::{List, Value};

/// A call frame representing a function invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Where execution resumes after `RET`.
    pub return_pc: usize,
    /// The caller's frame pointer.
    pub fp: usize,
    /// Stack index of the callee; the stack is truncated here on return.
    pub base: usize,
    /// Loop iterators open when the call started.
    pub loop_depth: usize,
}

/// State of one `for` loop or comprehension.
#[derive(Debug)]
pub enum LoopIter {
    /// Walks a live list by index, so items pushed during the loop are seen.
    List {
        items: Rc<RefCell<List>>,
        index: usize,
    },
    /// Walks a snapshot of a table's keys.
    Keys(std::vec::IntoIter<Value>),
    /// Walks a string one byte at a time, matching `len` and indexing.
    Bytes { text: Rc<str>, offset: usize },
}

impl LoopIter {
    /// Start iterating a value, or `None` if it is not iterable.
    pub fn new(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) => Some(LoopIter::List {
                items: items.clone(),
                index: 0,
            }),
            Value::Table(table) => Some(LoopIter::Keys(table.borrow().keys().into_iter())),
            Value::Str(text) => Some(LoopIter::Bytes {
                text: text.clone(),
                offset: 0,
            }),
            _ => None,
        }
    }

    pub fn next(&mut self) -> Option<Value> {
        match self {
            LoopIter::List { items, index } => {
                let item = items.borrow().get(*index).cloned()?;
                *index += 1;
                Some(item)
            }
            LoopIter::Keys(keys) => keys.next(),
            LoopIter::Bytes { text, offset } => {
                let byte = *text.as_bytes().get(*offset)?;
                *offset += 1;
                Some(Value::from_byte(byte))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Key, Table};

    fn collect(iter: &mut LoopIter) -> Vec<String> {
        std::iter::from_fn(|| iter.next())
            .map(|v| v.to_string())
            .collect()
    }

    #[test]
    fn test_list_iteration_is_live() {
        let list = Value::new_list(vec![Value::Int(1)]);
        let mut iter = LoopIter::new(&list).unwrap();
        assert_eq!(iter.next().map(|v| v.to_string()), Some("1".to_string()));
        if let Value::List(items) = &list {
            items.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(collect(&mut iter), vec!["2"]);
    }

    #[test]
    fn test_table_iterates_key_snapshot() {
        let mut table = Table::new();
        table.insert(Key::Int(1), Value::from("a"));
        table.insert(Key::Int(2), Value::from("b"));
        let table = Value::new_table(table);
        let mut iter = LoopIter::new(&table).unwrap();
        if let Value::Table(t) = &table {
            t.borrow_mut().insert(Key::Int(3), Value::Undef);
        }
        assert_eq!(collect(&mut iter), vec!["1", "2"]);
    }

    #[test]
    fn test_string_iterates_bytes() {
        let mut iter = LoopIter::new(&Value::from("hi!")).unwrap();
        assert_eq!(collect(&mut iter), vec!["h", "i", "!"]);

        let mut iter = LoopIter::new(&Value::from("é")).unwrap();
        assert_eq!(collect(&mut iter), vec!["\u{fffd}", "\u{fffd}"]);
    }

    #[test]
    fn test_not_iterable() {
        assert!(LoopIter::new(&Value::Int(3)).is_none());
    }
}
