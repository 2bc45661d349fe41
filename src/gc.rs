//! Garbage collection support.
//!
//! Reclamation itself is reference counting through the `Rc` object graph;
//! what this module adds is finalization: objects whose metatable defines
//! `__gc` are registered here, and `collectgarbage` runs the finalizer of
//! every registered object that has become unreachable (the registry holds
//! its last strong reference). To-be-closed ordering is the environment's
//! job; this registry only owns `__gc`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error_types::LuaResult;
use crate::interpreter::Interpreter;
use crate::metamethods::{self, Metamethod};
use crate::value::LuaValue;

/// Rough per-object footprint used by `collectgarbage("count")`.
const BYTES_PER_OBJECT: f64 = 64.0;

pub struct FinalizerRegistry {
    entries: RefCell<Vec<LuaValue>>,
}

impl FinalizerRegistry {
    pub fn new() -> Self {
        FinalizerRegistry { entries: RefCell::new(Vec::new()) }
    }

    /// Remember a value whose metatable carries `__gc`.
    pub fn register(&self, value: LuaValue) {
        if matches!(value, LuaValue::Table(_) | LuaValue::UserData(_)) {
            self.entries.borrow_mut().push(value);
        }
    }

    pub fn pending(&self) -> usize {
        self.entries.borrow().len()
    }
}

impl Default for FinalizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_sole_reference(value: &LuaValue) -> bool {
    match value {
        LuaValue::Table(t) => Rc::strong_count(t) == 1,
        LuaValue::UserData(u) => Rc::strong_count(u) == 1,
        _ => false,
    }
}

impl Interpreter {
    /// Run finalizers for unreachable registered objects; returns how many
    /// were collected.
    pub async fn collect_garbage(&self) -> LuaResult<usize> {
        let unreachable: Vec<LuaValue> = {
            let mut entries = self.state().finalizers.entries.borrow_mut();
            let mut kept = Vec::with_capacity(entries.len());
            let mut dead = Vec::new();
            for value in entries.drain(..) {
                if is_sole_reference(&value) {
                    dead.push(value);
                } else {
                    kept.push(value);
                }
            }
            *entries = kept;
            dead
        };

        let count = unreachable.len();
        for value in unreachable {
            if let Some(handler) = metamethods::lookup(self, &value, Metamethod::Gc) {
                // A failing finalizer must not abort the collection cycle.
                if let Err(err) = self.call_value(handler, vec![value.clone()]).await {
                    log::warn!("error in __gc finalizer: {}", err.message());
                }
            }
        }
        if count > 0 {
            log::debug!("collected {} finalizable objects", count);
        }
        Ok(count)
    }

    /// The `collectgarbage("count")` estimate, in kilobytes.
    pub fn gc_count_kb(&self) -> f64 {
        self.state().finalizers.pending() as f64 * BYTES_PER_OBJECT / 1024.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_tracks_tables_only() {
        let registry = FinalizerRegistry::new();
        registry.register(LuaValue::new_table());
        registry.register(LuaValue::Integer(1));
        assert_eq!(registry.pending(), 1);
    }

    #[test]
    fn test_sole_reference_detection() {
        let value = LuaValue::new_table();
        assert!(is_sole_reference(&value));
        let _alias = value.clone();
        assert!(!is_sole_reference(&value));
    }
}
