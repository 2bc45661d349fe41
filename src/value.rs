//! Runtime value representation.
//!
//! `LuaValue` is a closed tagged union; everything heap-like is `Rc`-shared
//! so tables, closures, threads, and userdata have identity and interior
//! mutability. `MultiValue` is the ordered tuple produced by calls and `...`,
//! truncated to one value everywhere except "last position" sites.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use num_bigint::BigInt;

use crate::ast::FunctionBody;
use crate::coroutine::LuaThread;
use crate::env::Environment;
use crate::error_types::LuaResult;
use crate::interpreter::Interpreter;
use crate::lua_string::LuaStr;
use crate::number;
use crate::table::LuaTable;

/// Shared handle to a mutable table.
pub type TableRef = Rc<RefCell<LuaTable>>;

/// Host function signature: already-expanded arguments in, value tuple out.
pub type NativeFn =
    Box<dyn Fn(Interpreter, Vec<LuaValue>) -> LocalBoxFuture<'static, LuaResult<MultiValue>>>;

/// A host (native) function with a name for traces and error messages.
pub struct NativeFunction {
    pub name: String,
    pub func: NativeFn,
}

/// A Lua function value: captured body, definition environment, chunk name.
/// Function identity is the `Rc` allocation, never the body.
pub struct Closure {
    pub body: Rc<FunctionBody>,
    pub env: Rc<Environment>,
    pub chunk: Rc<str>,
    /// Best-known name, filled in at definition sites for tracebacks.
    pub name: RefCell<Option<String>>,
}

/// Function values: interpreted closures or host functions.
#[derive(Clone)]
pub enum LuaFunction {
    Lua(Rc<Closure>),
    Native(Rc<NativeFunction>),
}

impl LuaFunction {
    pub fn name(&self) -> Option<String> {
        match self {
            LuaFunction::Lua(c) => c.name.borrow().clone(),
            LuaFunction::Native(n) => Some(n.name.clone()),
        }
    }

    fn addr(&self) -> usize {
        match self {
            LuaFunction::Lua(c) => Rc::as_ptr(c) as usize,
            LuaFunction::Native(n) => Rc::as_ptr(n) as usize,
        }
    }
}

/// Opaque host object with an optional metatable.
pub struct LuaUserData {
    pub data: RefCell<Box<dyn Any>>,
    pub metatable: RefCell<Option<TableRef>>,
}

impl LuaUserData {
    pub fn new(data: Box<dyn Any>) -> Rc<Self> {
        Rc::new(LuaUserData { data: RefCell::new(data), metatable: RefCell::new(None) })
    }
}

/// A Lua runtime value.
#[derive(Clone)]
pub enum LuaValue {
    Nil,
    Boolean(bool),
    /// 64-bit signed integer subtype of `number`.
    Integer(i64),
    /// Double subtype of `number`.
    Float(f64),
    /// Arbitrary precision integer, only for literals outside i64.
    BigInt(Rc<BigInt>),
    Str(LuaStr),
    Table(TableRef),
    Function(LuaFunction),
    Thread(Rc<LuaThread>),
    UserData(Rc<LuaUserData>),
}

impl LuaValue {
    /// false and nil are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Boolean(_) => "boolean",
            LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_) => "number",
            LuaValue::Str(_) => "string",
            LuaValue::Table(_) => "table",
            LuaValue::Function(_) => "function",
            LuaValue::Thread(_) => "thread",
            LuaValue::UserData(_) => "userdata",
        }
    }

    pub fn new_table() -> LuaValue {
        LuaValue::Table(Rc::new(RefCell::new(LuaTable::new())))
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&LuaStr> {
        match self {
            LuaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Default `tostring` rendering, before any `__tostring` dispatch.
    pub fn default_tostring(&self) -> String {
        match self {
            LuaValue::Nil => "nil".to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_) => {
                number::format_number(self)
            }
            LuaValue::Str(s) => s.to_lossy(),
            LuaValue::Table(t) => format!("table: {:#x}", Rc::as_ptr(t) as *const () as usize),
            LuaValue::Function(f) => format!("function: {:#x}", f.addr()),
            LuaValue::Thread(t) => format!("thread: {:#x}", Rc::as_ptr(t) as usize),
            LuaValue::UserData(u) => {
                format!("userdata: {:#x}", Rc::as_ptr(u) as *const () as usize)
            }
        }
    }
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<i64> for LuaValue {
    fn from(i: i64) -> Self {
        LuaValue::Integer(i)
    }
}

impl From<f64> for LuaValue {
    fn from(f: f64) -> Self {
        LuaValue::Float(f)
    }
}

impl From<&str> for LuaValue {
    fn from(s: &str) -> Self {
        LuaValue::Str(LuaStr::from(s))
    }
}

impl From<String> for LuaValue {
    fn from(s: String) -> Self {
        LuaValue::Str(LuaStr::from(s))
    }
}

impl From<LuaStr> for LuaValue {
    fn from(s: LuaStr) -> Self {
        LuaValue::Str(s)
    }
}

/// Raw equality: numbers compare across subtypes, reference types by
/// identity. Metamethod-aware equality lives in the evaluator.
impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        use LuaValue::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(_) | Float(_) | BigInt(_), Integer(_) | Float(_) | BigInt(_)) => {
                number::numbers_equal(self, other)
            }
            (Str(a), Str(b)) => a == b,
            (Table(a), Table(b)) => Rc::ptr_eq(a, b),
            (Function(a), Function(b)) => a.addr() == b.addr(),
            (Thread(a), Thread(b)) => Rc::ptr_eq(a, b),
            (UserData(a), UserData(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// NaN never reaches a context that relies on reflexivity: table keys are
// normalized and NaN keys rejected before insertion.
impl Eq for LuaValue {}

impl Hash for LuaValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            LuaValue::Nil => state.write_u8(0),
            LuaValue::Boolean(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            LuaValue::Integer(i) => {
                state.write_u8(2);
                i.hash(state);
            }
            LuaValue::Float(f) => {
                // Floats with exact integer values hash like that integer so
                // cross-subtype equality stays consistent.
                if let Some(i) = number::float_to_integer_exact(*f) {
                    state.write_u8(2);
                    i.hash(state);
                } else {
                    state.write_u8(3);
                    f.to_bits().hash(state);
                }
            }
            LuaValue::BigInt(b) => {
                state.write_u8(4);
                b.hash(state);
            }
            LuaValue::Str(s) => {
                state.write_u8(5);
                s.hash(state);
            }
            LuaValue::Table(t) => {
                state.write_u8(6);
                (Rc::as_ptr(t) as *const () as usize).hash(state);
            }
            LuaValue::Function(f) => {
                state.write_u8(7);
                f.addr().hash(state);
            }
            LuaValue::Thread(t) => {
                state.write_u8(8);
                (Rc::as_ptr(t) as usize).hash(state);
            }
            LuaValue::UserData(u) => {
                state.write_u8(9);
                (Rc::as_ptr(u) as *const () as usize).hash(state);
            }
        }
    }
}

impl fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::Str(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other.default_tostring()),
        }
    }
}

impl fmt::Display for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.default_tostring())
    }
}

/// The ordered tuple produced by calls, method calls, and `...`.
#[derive(Debug, Clone, Default)]
pub struct MultiValue {
    values: Vec<LuaValue>,
}

impl MultiValue {
    pub fn empty() -> Self {
        MultiValue { values: Vec::new() }
    }

    pub fn single(value: LuaValue) -> Self {
        MultiValue { values: vec![value] }
    }

    pub fn from_vec(values: Vec<LuaValue>) -> Self {
        MultiValue { values }
    }

    /// First value, or nil when the tuple is empty; the truncation every
    /// non-last context performs.
    pub fn first(&self) -> LuaValue {
        self.values.first().cloned().unwrap_or(LuaValue::Nil)
    }

    pub fn into_first(mut self) -> LuaValue {
        if self.values.is_empty() {
            LuaValue::Nil
        } else {
            self.values.swap_remove(0)
        }
    }

    pub fn get(&self, index: usize) -> LuaValue {
        self.values.get(index).cloned().unwrap_or(LuaValue::Nil)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: LuaValue) {
        self.values.push(value);
    }

    pub fn into_vec(self) -> Vec<LuaValue> {
        self.values
    }

    pub fn as_slice(&self) -> &[LuaValue] {
        &self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LuaValue> {
        self.values.iter()
    }
}

impl From<Vec<LuaValue>> for MultiValue {
    fn from(values: Vec<LuaValue>) -> Self {
        MultiValue { values }
    }
}

impl IntoIterator for MultiValue {
    type Item = LuaValue;
    type IntoIter = std::vec::IntoIter<LuaValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}
