//! A minimal debug library: tracebacks and frame introspection.

use crate::error_types::LuaResult;
use crate::interpreter::Interpreter;
use crate::stdlib::{native_sync, new_table, set, validation};
use crate::value::{LuaValue, MultiValue, TableRef};

fn lua_traceback(interp: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let message = match args.first() {
        None | Some(LuaValue::Nil) => None,
        Some(LuaValue::Str(s)) => Some(s.to_lossy()),
        // Non-string messages pass through untouched, like the reference
        // implementation.
        Some(other) => return Ok(MultiValue::single(other.clone())),
    };
    let text = interp.traceback_string(message.as_deref());
    Ok(MultiValue::single(LuaValue::from(text)))
}

fn lua_getinfo(interp: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let level = validation::check_int("getinfo", &args, 1)?;
    if level < 0 {
        return Ok(MultiValue::single(LuaValue::Nil));
    }
    let frames = interp.current_frames();
    let frames = frames.borrow();
    // Level 0 is getinfo itself.
    let index = match frames.len().checked_sub(1 + level as usize) {
        Some(index) => index,
        None => return Ok(MultiValue::single(LuaValue::Nil)),
    };
    let frame = &frames[index];
    let info = new_table();
    {
        let mut t = info.borrow_mut();
        t.raw_set(LuaValue::from("currentline"), LuaValue::Integer(frame.line.get() as i64))?;
        t.raw_set(LuaValue::from("source"), LuaValue::from(format!("@{}", frame.chunk)))?;
        t.raw_set(LuaValue::from("short_src"), LuaValue::from(frame.chunk.as_ref()))?;
        let what = if frame.chunk.as_ref() == "[C]" { "C" } else { "Lua" };
        t.raw_set(LuaValue::from("what"), LuaValue::from(what))?;
        if let Some(name) = &frame.name {
            t.raw_set(LuaValue::from("name"), LuaValue::from(name.as_str()))?;
        }
    }
    Ok(MultiValue::single(LuaValue::Table(info)))
}

pub fn install(_interp: &Interpreter, globals: &TableRef) {
    let debug = new_table();
    set(&debug, "traceback", native_sync("traceback", lua_traceback));
    set(&debug, "getinfo", native_sync("getinfo", lua_getinfo));
    set(globals, "debug", LuaValue::Table(debug));
}
