//! Lexically scoped symbol environment.
//!
//! An `Env` is a chain of scopes. Slots are handed out by one counter per
//! chain and never reused, so the final count is the number of slots the
//! chain needs at runtime.

use std::collections::HashMap;

use thiserror::Error;

/// A resolved variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub slot: usize,
    pub is_const: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{0}` is already declared in this scope")]
pub struct AlreadyDeclared(pub String);

/// A chain of scopes, innermost last.
#[derive(Debug)]
pub struct Env {
    scopes: Vec<HashMap<String, Binding>>,
    next_slot: usize,
}

impl Env {
    /// A chain holding a single outermost scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
            next_slot: 0,
        }
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Leave the innermost scope. The outermost scope is never removed.
    pub fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Bind `name` in the innermost scope to a fresh slot.
    pub fn declare(&mut self, name: &str) -> Result<usize, AlreadyDeclared> {
        if self.contains_current_scope(name) {
            return Err(AlreadyDeclared(name.to_string()));
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(
                name.to_string(),
                Binding {
                    slot,
                    is_const: false,
                },
            );
        }
        Ok(slot)
    }

    /// Resolve `name`, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    /// Mark the innermost binding of `name` as constant.
    pub fn mark_const(&mut self, name: &str) -> bool {
        match self
            .scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
        {
            Some(binding) => {
                binding.is_const = true;
                true
            }
            None => false,
        }
    }

    pub fn contains_current_scope(&self, name: &str) -> bool {
        self.scopes
            .last()
            .is_some_and(|scope| scope.contains_key(name))
    }

    pub fn contains_any_scope(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Slots handed out so far.
    pub fn slot_count(&self) -> usize {
        self.next_slot
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_lookup() {
        let mut env = Env::new();
        assert_eq!(env.declare("x"), Ok(0));
        assert_eq!(env.declare("y"), Ok(1));
        assert_eq!(
            env.lookup("y"),
            Some(Binding {
                slot: 1,
                is_const: false
            })
        );
        assert_eq!(env.lookup("z"), None);
    }

    #[test]
    fn test_redeclaration_in_same_scope() {
        let mut env = Env::new();
        env.declare("x").unwrap();
        assert_eq!(env.declare("x"), Err(AlreadyDeclared("x".to_string())));
        assert_eq!(env.slot_count(), 1);
    }

    #[test]
    fn test_shadowing() {
        let mut env = Env::new();
        env.declare("x").unwrap();
        env.enter_scope();
        assert_eq!(env.declare("x"), Ok(1));
        assert_eq!(env.lookup("x").map(|b| b.slot), Some(1));
        assert!(env.contains_current_scope("x"));
        env.exit_scope();
        assert_eq!(env.lookup("x").map(|b| b.slot), Some(0));
    }

    #[test]
    fn test_slots_never_reused() {
        let mut env = Env::new();
        env.enter_scope();
        env.declare("a").unwrap();
        env.exit_scope();
        env.enter_scope();
        assert_eq!(env.declare("b"), Ok(1));
        env.exit_scope();
        assert_eq!(env.slot_count(), 2);
        assert!(!env.contains_any_scope("a"));
    }

    #[test]
    fn test_mark_const() {
        let mut env = Env::new();
        env.declare("x").unwrap();
        env.enter_scope();
        env.declare("x").unwrap();
        assert!(env.mark_const("x"));
        assert!(env.lookup("x").unwrap().is_const);
        env.exit_scope();
        assert!(!env.lookup("x").unwrap().is_const);
        assert!(!env.mark_const("missing"));
    }

    #[test]
    fn test_outermost_scope_is_kept() {
        let mut env = Env::new();
        env.exit_scope();
        assert_eq!(env.depth(), 1);
        env.declare("x").unwrap();
        assert!(env.contains_current_scope("x"));
    }
}
