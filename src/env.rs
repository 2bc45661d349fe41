//! Lexical environments.
//!
//! An `Environment` is one scope frame: a map from names to shared mutable
//! `Slot`s, a link to the lexical parent, an optional varargs binding (set on
//! function-boundary frames), and the frame's to-be-closed list. Closures
//! keep an `Rc` to their definition frame; because slots are `Rc`-shared
//! cells, an upvalue stays readable and writable after the defining frame is
//! gone, and two closures capturing the same local share storage.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::LuaValue;

/// Attribute of a local binding, from `<const>` / `<close>` annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAttrib {
    Regular,
    Const,
    Close,
}

/// A variable's storage cell. The spec calls this a Box.
pub struct Slot {
    value: RefCell<LuaValue>,
    attrib: SlotAttrib,
}

impl Slot {
    pub fn new(value: LuaValue, attrib: SlotAttrib) -> Rc<Self> {
        Rc::new(Slot { value: RefCell::new(value), attrib })
    }

    pub fn get(&self) -> LuaValue {
        self.value.borrow().clone()
    }

    pub fn set(&self, value: LuaValue) {
        *self.value.borrow_mut() = value;
    }

    pub fn attrib(&self) -> SlotAttrib {
        self.attrib
    }
}

/// One scope frame in the environment chain.
pub struct Environment {
    parent: Option<Rc<Environment>>,
    slots: RefCell<HashMap<String, Rc<Slot>>>,
    /// Set on function-boundary frames; inner blocks delegate to the
    /// enclosing function's binding.
    varargs: Option<Rc<Vec<LuaValue>>>,
    /// Slots declared `<close>` in this frame, in declaration order.
    close_list: RefCell<Vec<Rc<Slot>>>,
}

impl Environment {
    /// A frame with no parent: the scope of a chunk.
    pub fn root() -> Rc<Environment> {
        Rc::new(Environment {
            parent: None,
            slots: RefCell::new(HashMap::new()),
            varargs: None,
            close_list: RefCell::new(Vec::new()),
        })
    }

    /// A block scope nested in `parent`.
    pub fn child(parent: &Rc<Environment>) -> Rc<Environment> {
        Rc::new(Environment {
            parent: Some(parent.clone()),
            slots: RefCell::new(HashMap::new()),
            varargs: None,
            close_list: RefCell::new(Vec::new()),
        })
    }

    /// A function-boundary scope with its own varargs binding.
    pub fn function_scope(parent: &Rc<Environment>, varargs: Vec<LuaValue>) -> Rc<Environment> {
        Rc::new(Environment {
            parent: Some(parent.clone()),
            slots: RefCell::new(HashMap::new()),
            varargs: Some(Rc::new(varargs)),
            close_list: RefCell::new(Vec::new()),
        })
    }

    /// Introduce a local in this frame, shadowing any outer binding.
    pub fn declare(&self, name: &str, value: LuaValue, attrib: SlotAttrib) -> Rc<Slot> {
        let slot = Slot::new(value, attrib);
        if attrib == SlotAttrib::Close {
            self.close_list.borrow_mut().push(slot.clone());
        }
        self.slots.borrow_mut().insert(name.to_string(), slot.clone());
        slot
    }

    /// Resolve a name through the chain; `None` means the name is free
    /// (a global, to be resolved through `_ENV`).
    pub fn lookup(&self, name: &str) -> Option<Rc<Slot>> {
        if let Some(slot) = self.slots.borrow().get(name) {
            return Some(slot.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn get(&self, name: &str) -> Option<LuaValue> {
        self.lookup(name).map(|slot| slot.get())
    }

    /// The varargs of the enclosing function scope.
    pub fn varargs(&self) -> Option<Rc<Vec<LuaValue>>> {
        if let Some(va) = &self.varargs {
            return Some(va.clone());
        }
        self.parent.as_ref().and_then(|p| p.varargs())
    }

    /// Drain this frame's to-be-closed slots, in declaration order; callers
    /// process them in reverse.
    pub fn take_close_list(&self) -> Vec<Rc<Slot>> {
        std::mem::take(&mut *self.close_list.borrow_mut())
    }

    pub fn has_pending_close(&self) -> bool {
        !self.close_list.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> LuaValue {
        LuaValue::Integer(i)
    }

    #[test]
    fn test_declare_and_lookup() {
        let env = Environment::root();
        env.declare("x", int(1), SlotAttrib::Regular);
        assert_eq!(env.get("x"), Some(int(1)));
        assert_eq!(env.get("y"), None);
    }

    #[test]
    fn test_child_shadows_parent() {
        let outer = Environment::root();
        outer.declare("x", int(1), SlotAttrib::Regular);
        let inner = Environment::child(&outer);
        inner.declare("x", int(2), SlotAttrib::Regular);
        assert_eq!(inner.get("x"), Some(int(2)));
        assert_eq!(outer.get("x"), Some(int(1)));
    }

    #[test]
    fn test_slot_shared_after_frame_drop() {
        let outer = Environment::root();
        let slot = {
            let inner = Environment::child(&outer);
            inner.declare("captured", int(10), SlotAttrib::Regular)
        };
        // The frame is gone; the upvalue cell still reads and writes.
        slot.set(int(11));
        assert_eq!(slot.get(), int(11));
    }

    #[test]
    fn test_write_through_parent_slot() {
        let outer = Environment::root();
        outer.declare("x", int(1), SlotAttrib::Regular);
        let inner = Environment::child(&outer);
        inner.lookup("x").unwrap().set(int(5));
        assert_eq!(outer.get("x"), Some(int(5)));
    }

    #[test]
    fn test_varargs_resolved_through_blocks() {
        let root = Environment::root();
        let func = Environment::function_scope(&root, vec![int(1), int(2)]);
        let block = Environment::child(&func);
        let va = block.varargs().unwrap();
        assert_eq!(va.len(), 2);
        // A nested function scope hides the outer varargs.
        let inner_fn = Environment::function_scope(&block, vec![]);
        assert_eq!(inner_fn.varargs().unwrap().len(), 0);
    }

    #[test]
    fn test_close_list_order() {
        let env = Environment::root();
        env.declare("a", int(1), SlotAttrib::Close);
        env.declare("b", int(2), SlotAttrib::Close);
        let list = env.take_close_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].get(), int(1));
        assert_eq!(list[1].get(), int(2));
        assert!(!env.has_pending_close());
    }

    #[test]
    fn test_const_attrib_recorded() {
        let env = Environment::root();
        let slot = env.declare("k", int(1), SlotAttrib::Const);
        assert_eq!(slot.attrib(), SlotAttrib::Const);
    }
}
