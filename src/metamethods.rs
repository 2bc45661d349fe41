//! Metamethod names and lookup.
//!
//! Dispatch itself lives in the evaluator; this module owns the event table
//! and the "which metatable does this value have" question.

use std::fmt;

use crate::interpreter::Interpreter;
use crate::number::ArithOp;
use crate::value::{LuaValue, TableRef};

/// Metamethod events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metamethod {
    Index,
    NewIndex,
    Call,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    IDiv,
    BAnd,
    BOr,
    BXor,
    BNot,
    Shl,
    Shr,
    Concat,
    Len,
    Eq,
    Lt,
    Le,
    ToString,
    Pairs,
    Close,
    Gc,
    Metatable,
    Name,
}

impl Metamethod {
    pub fn name(self) -> &'static str {
        match self {
            Metamethod::Index => "__index",
            Metamethod::NewIndex => "__newindex",
            Metamethod::Call => "__call",
            Metamethod::Add => "__add",
            Metamethod::Sub => "__sub",
            Metamethod::Mul => "__mul",
            Metamethod::Div => "__div",
            Metamethod::Mod => "__mod",
            Metamethod::Pow => "__pow",
            Metamethod::Unm => "__unm",
            Metamethod::IDiv => "__idiv",
            Metamethod::BAnd => "__band",
            Metamethod::BOr => "__bor",
            Metamethod::BXor => "__bxor",
            Metamethod::BNot => "__bnot",
            Metamethod::Shl => "__shl",
            Metamethod::Shr => "__shr",
            Metamethod::Concat => "__concat",
            Metamethod::Len => "__len",
            Metamethod::Eq => "__eq",
            Metamethod::Lt => "__lt",
            Metamethod::Le => "__le",
            Metamethod::ToString => "__tostring",
            Metamethod::Pairs => "__pairs",
            Metamethod::Close => "__close",
            Metamethod::Gc => "__gc",
            Metamethod::Metatable => "__metatable",
            Metamethod::Name => "__name",
        }
    }

    /// The event fired when an arithmetic/bitwise operation falls through.
    pub fn from_arith(op: ArithOp) -> Metamethod {
        match op {
            ArithOp::Add => Metamethod::Add,
            ArithOp::Sub => Metamethod::Sub,
            ArithOp::Mul => Metamethod::Mul,
            ArithOp::Div => Metamethod::Div,
            ArithOp::IDiv => Metamethod::IDiv,
            ArithOp::Mod => Metamethod::Mod,
            ArithOp::Pow => Metamethod::Pow,
            ArithOp::Unm => Metamethod::Unm,
            ArithOp::BAnd => Metamethod::BAnd,
            ArithOp::BOr => Metamethod::BOr,
            ArithOp::BXor => Metamethod::BXor,
            ArithOp::BNot => Metamethod::BNot,
            ArithOp::Shl => Metamethod::Shl,
            ArithOp::Shr => Metamethod::Shr,
        }
    }
}

impl fmt::Display for Metamethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The metatable governing a value, if any. Strings share one interpreter-
/// wide metatable; tables and userdata carry their own pointer.
pub fn metatable_of(interp: &Interpreter, value: &LuaValue) -> Option<TableRef> {
    match value {
        LuaValue::Table(t) => t.borrow().metatable(),
        LuaValue::UserData(u) => u.metatable.borrow().clone(),
        LuaValue::Str(_) => Some(interp.string_metatable()),
        _ => None,
    }
}

/// Resolve a metamethod on a value; nil fields count as absent.
pub fn lookup(interp: &Interpreter, value: &LuaValue, event: Metamethod) -> Option<LuaValue> {
    let mt = metatable_of(interp, value)?;
    let handler = mt.borrow().raw_get(&LuaValue::from(event.name()));
    if handler.is_nil() {
        None
    } else {
        Some(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(Metamethod::Index.name(), "__index");
        assert_eq!(Metamethod::Concat.name(), "__concat");
        assert_eq!(Metamethod::Close.name(), "__close");
    }

    #[test]
    fn test_arith_mapping() {
        assert_eq!(Metamethod::from_arith(ArithOp::Add), Metamethod::Add);
        assert_eq!(Metamethod::from_arith(ArithOp::Shr), Metamethod::Shr);
    }
}
