//! Per-call creation context
//!
//! Tracks which non-singleton beans are being built on the current call
//! stack. One context is created per top-level lookup and handed down
//! through every nested build, so prototype cycles are detected without
//! any thread-local state.

use crate::{DiError, Result};
use std::cell::RefCell;
use std::collections::HashSet;

/// Non-singleton names under construction in one resolution call tree.
#[derive(Debug, Default)]
pub struct CreationContext {
    prototypes: RefCell<HashSet<String>>,
}

impl CreationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is already being built further up this call tree.
    pub fn is_prototype_in_creation(&self, name: &str) -> bool {
        self.prototypes.borrow().contains(name)
    }

    /// Mark `name` as in creation until the returned guard drops.
    pub fn enter_prototype(&self, name: &str) -> Result<PrototypeGuard<'_>> {
        if !self.prototypes.borrow_mut().insert(name.to_string()) {
            return Err(DiError::in_creation(
                name,
                "requested again while its own construction is in progress; is there an unresolvable circular reference?",
            ));
        }
        Ok(PrototypeGuard {
            context: self,
            name: name.to_string(),
        })
    }

    /// Number of names currently marked.
    pub fn depth(&self) -> usize {
        self.prototypes.borrow().len()
    }
}

/// Clears a prototype marker when construction ends, successfully or not.
#[derive(Debug)]
pub struct PrototypeGuard<'a> {
    context: &'a CreationContext,
    name: String,
}

impl Drop for PrototypeGuard<'_> {
    fn drop(&mut self) {
        self.context.prototypes.borrow_mut().remove(&self.name);
    }
}
