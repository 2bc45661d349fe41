//! Standard library installation.
//!
//! Each library is a table of host functions placed on the globals table at
//! startup. Host functions receive the interpreter handle and the expanded
//! argument list and return a value tuple; the async wrapper lets natives
//! like `pcall` and `coroutine.yield` re-enter evaluation.

pub mod basic;
pub mod coroutine;
pub mod debug;
pub mod io;
pub mod math;
pub mod os;
pub mod string;
pub mod table;
pub mod validation;

use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;

use crate::error_types::LuaResult;
use crate::interpreter::Interpreter;
use crate::value::{LuaFunction, LuaValue, MultiValue, NativeFunction, TableRef};

pub(crate) type NativeOut = LuaResult<MultiValue>;

/// Wrap an async host function as a Lua function value.
pub(crate) fn native<F, Fut>(name: &'static str, f: F) -> LuaValue
where
    F: Fn(Interpreter, Vec<LuaValue>) -> Fut + 'static,
    Fut: Future<Output = NativeOut> + 'static,
{
    LuaValue::Function(LuaFunction::Native(Rc::new(NativeFunction {
        name: name.to_string(),
        func: Box::new(move |interp, args| f(interp, args).boxed_local()),
    })))
}

/// Wrap a plain host function that never re-enters evaluation.
pub(crate) fn native_sync<F>(name: &'static str, f: F) -> LuaValue
where
    F: Fn(&Interpreter, Vec<LuaValue>) -> NativeOut + 'static,
{
    LuaValue::Function(LuaFunction::Native(Rc::new(NativeFunction {
        name: name.to_string(),
        func: Box::new(move |interp, args| {
            let result = f(&interp, args);
            async move { result }.boxed_local()
        }),
    })))
}

/// Install a value under a string key.
pub(crate) fn set(table: &TableRef, key: &str, value: LuaValue) {
    table
        .borrow_mut()
        .raw_set(LuaValue::from(key), value)
        .expect("string keys are always storable");
}

/// Build a fresh library table.
pub(crate) fn new_table() -> TableRef {
    Rc::new(std::cell::RefCell::new(crate::table::LuaTable::new()))
}

/// Install every library onto the interpreter's globals.
pub fn install(interp: &Interpreter) {
    let globals = interp.globals();
    basic::install(interp, &globals);
    string::install(interp, &globals);
    table::install(interp, &globals);
    math::install(interp, &globals);
    coroutine::install(interp, &globals);
    os::install(interp, &globals);
    io::install(interp, &globals);
    debug::install(interp, &globals);
}
