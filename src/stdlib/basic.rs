//! The basic library: globals installed directly on `_G`.

use crate::error_types::{LuaError, LuaResult};
use crate::interpreter::Interpreter;
use crate::loader;
use crate::metamethods::{self, Metamethod};
use crate::number;
use crate::stdlib::{native, native_sync, set, validation};
use crate::value::{LuaValue, MultiValue, TableRef};

/// Source position `level` call frames above the running native, for
/// `error`'s message prefix.
fn position_at_level(interp: &Interpreter, level: i64) -> Option<(String, u32)> {
    if level <= 0 {
        return None;
    }
    let frames = interp.current_frames();
    let frames = frames.borrow();
    let index = frames.len().checked_sub(1 + level as usize)?;
    let frame = &frames[index];
    // Host-function frames carry no usable position.
    if frame.chunk.as_ref() == "[C]" {
        return None;
    }
    Some((frame.chunk.to_string(), frame.line.get()))
}

async fn lua_print(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let mut pieces = Vec::with_capacity(args.len());
    for value in &args {
        pieces.push(interp.tostring_value(value).await?);
    }
    println!("{}", pieces.join("\t"));
    Ok(MultiValue::empty())
}

fn lua_type(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_any("type", &args, 1)?;
    Ok(MultiValue::single(LuaValue::from(value.type_name())))
}

async fn lua_tostring(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_any("tostring", &args, 1)?;
    let text = interp.tostring_value(&value).await?;
    Ok(MultiValue::single(LuaValue::from(text)))
}

fn lua_tonumber(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_any("tonumber", &args, 1)?;
    match validation::arg(&args, 2) {
        LuaValue::Nil => {
            let result = number::coerce_to_number(&value).unwrap_or(LuaValue::Nil);
            Ok(MultiValue::single(result))
        }
        _ => {
            let base = validation::check_int("tonumber", &args, 2)?;
            if !(2..=36).contains(&base) {
                return Err(LuaError::runtime(
                    "bad argument #2 to 'tonumber' (base out of range)",
                ));
            }
            let text = match &value {
                LuaValue::Str(s) => s.to_lossy(),
                other => {
                    return Err(validation::bad_argument("tonumber", 1, "string", other));
                }
            };
            let result = i64::from_str_radix(text.trim(), base as u32)
                .map(LuaValue::Integer)
                .unwrap_or(LuaValue::Nil);
            Ok(MultiValue::single(result))
        }
    }
}

async fn ipairs_iter(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let table = validation::check_any("ipairs", &args, 1)?;
    let index = validation::check_int("ipairs", &args, 2)? + 1;
    let value = interp.get_index(table, LuaValue::Integer(index)).await?;
    if value.is_nil() {
        Ok(MultiValue::single(LuaValue::Nil))
    } else {
        Ok(MultiValue::from_vec(vec![LuaValue::Integer(index), value]))
    }
}

fn lua_ipairs(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let table = validation::check_any("ipairs", &args, 1)?;
    Ok(MultiValue::from_vec(vec![
        native("ipairs_iterator", ipairs_iter),
        table,
        LuaValue::Integer(0),
    ]))
}

fn lua_next(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let table = validation::check_table("next", &args, 1)?;
    let key = validation::arg(&args, 2);
    let entry = table.borrow().next_entry(&key)?;
    match entry {
        Some((k, v)) => Ok(MultiValue::from_vec(vec![k, v])),
        None => Ok(MultiValue::single(LuaValue::Nil)),
    }
}

async fn lua_pairs(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_any("pairs", &args, 1)?;
    if let Some(handler) = metamethods::lookup(&interp, &value, Metamethod::Pairs) {
        let results = interp.call_value(handler, vec![value]).await?;
        let mut out = results.into_vec();
        out.resize(3, LuaValue::Nil);
        return Ok(MultiValue::from_vec(out));
    }
    validation::check_table("pairs", &args, 1)?;
    Ok(MultiValue::from_vec(vec![
        native_sync("next", lua_next),
        value,
        LuaValue::Nil,
    ]))
}

fn lua_select(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let selector = validation::check_any("select", &args, 1)?;
    let rest = &args[1..];
    if let LuaValue::Str(s) = &selector {
        if s.as_bytes() == b"#" {
            return Ok(MultiValue::single(LuaValue::Integer(rest.len() as i64)));
        }
    }
    let index = validation::check_int("select", &args, 1)?;
    if index == 0 {
        return Err(LuaError::runtime("bad argument #1 to 'select' (index out of range)"));
    }
    let start = if index < 0 {
        let back = rest.len() as i64 + index;
        if back < 0 {
            return Err(LuaError::runtime(
                "bad argument #1 to 'select' (index out of range)",
            ));
        }
        back as usize
    } else {
        ((index - 1) as usize).min(rest.len())
    };
    Ok(MultiValue::from_vec(rest[start..].to_vec()))
}

fn lua_rawget(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let table = validation::check_table("rawget", &args, 1)?;
    let key = validation::check_any("rawget", &args, 2)?;
    let value = table.borrow().raw_get(&key);
    Ok(MultiValue::single(value))
}

fn lua_rawset(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let table = validation::check_table("rawset", &args, 1)?;
    let key = validation::check_any("rawset", &args, 2)?;
    let value = validation::arg(&args, 3);
    table.borrow_mut().raw_set(key, value)?;
    Ok(MultiValue::single(LuaValue::Table(table)))
}

fn lua_rawequal(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let a = validation::check_any("rawequal", &args, 1)?;
    let b = validation::check_any("rawequal", &args, 2)?;
    Ok(MultiValue::single(LuaValue::Boolean(a == b)))
}

fn lua_rawlen(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_any("rawlen", &args, 1)?;
    match &value {
        LuaValue::Table(t) => Ok(MultiValue::single(LuaValue::Integer(t.borrow().length()))),
        LuaValue::Str(s) => Ok(MultiValue::single(LuaValue::Integer(s.len() as i64))),
        other => Err(validation::bad_argument("rawlen", 1, "table or string", other)),
    }
}

fn lua_assert(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_any("assert", &args, 1)?;
    if value.is_truthy() {
        return Ok(MultiValue::from_vec(args));
    }
    match args.get(1) {
        Some(message) => Err(LuaError::user(message.clone())),
        None => Err(LuaError::runtime("assertion failed!")),
    }
}

fn lua_error(interp: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::arg(&args, 1);
    let level = validation::opt_int("error", &args, 2, 1)?;
    if let LuaValue::Str(message) = &value {
        if let Some((chunk, line)) = position_at_level(interp, level) {
            let prefixed = LuaValue::from(format!("{}:{}: {}", chunk, line, message));
            return Err(LuaError::user(prefixed).mark_positioned());
        }
    }
    Err(LuaError::user(value).mark_positioned())
}

async fn lua_pcall(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let func = validation::check_any("pcall", &args, 1)?;
    let rest = args.get(1..).map(<[LuaValue]>::to_vec).unwrap_or_default();
    interp.enter_protected();
    let result = interp.call_value(func, rest).await;
    interp.leave_protected();
    match result {
        Ok(values) => {
            let mut out = vec![LuaValue::Boolean(true)];
            out.extend(values.into_vec());
            Ok(MultiValue::from_vec(out))
        }
        Err(err) => Ok(MultiValue::from_vec(vec![LuaValue::Boolean(false), err.value()])),
    }
}

async fn lua_xpcall(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let func = validation::check_any("xpcall", &args, 1)?;
    let handler = validation::check_function("xpcall", &args, 2)?;
    let rest = args.get(2..).map(<[LuaValue]>::to_vec).unwrap_or_default();
    interp.enter_protected();
    let result = interp.call_value(func, rest).await;
    interp.leave_protected();
    match result {
        Ok(values) => {
            let mut out = vec![LuaValue::Boolean(true)];
            out.extend(values.into_vec());
            Ok(MultiValue::from_vec(out))
        }
        Err(err) => {
            // The handler runs before control returns to the caller, with the
            // error value as its argument.
            let handled = interp.call_value(handler, vec![err.value()]).await?;
            let mut out = vec![LuaValue::Boolean(false)];
            out.extend(handled.into_vec());
            Ok(MultiValue::from_vec(out))
        }
    }
}

fn lua_setmetatable(interp: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let table = validation::check_table("setmetatable", &args, 1)?;
    let meta = validation::arg(&args, 2);
    if let Some(current) = table.borrow().metatable() {
        let protected = !current
            .borrow()
            .raw_get(&LuaValue::from(Metamethod::Metatable.name()))
            .is_nil();
        if protected {
            return Err(LuaError::runtime("cannot change a protected metatable"));
        }
    }
    match meta {
        LuaValue::Nil => table.borrow_mut().set_metatable(None),
        LuaValue::Table(mt) => {
            let has_gc = !mt.borrow().raw_get(&LuaValue::from(Metamethod::Gc.name())).is_nil();
            table.borrow_mut().set_metatable(Some(mt));
            if has_gc {
                interp.state().finalizers.register(LuaValue::Table(table.clone()));
            }
        }
        other => return Err(validation::bad_argument("setmetatable", 2, "nil or table", &other)),
    }
    Ok(MultiValue::single(LuaValue::Table(table)))
}

fn lua_getmetatable(interp: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_any("getmetatable", &args, 1)?;
    match metamethods::metatable_of(interp, &value) {
        Some(mt) => {
            let guard = mt.borrow().raw_get(&LuaValue::from(Metamethod::Metatable.name()));
            if guard.is_nil() {
                Ok(MultiValue::single(LuaValue::Table(mt)))
            } else {
                Ok(MultiValue::single(guard))
            }
        }
        None => Ok(MultiValue::single(LuaValue::Nil)),
    }
}

async fn lua_collectgarbage(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let option = validation::opt_str("collectgarbage", &args, 1, "collect")?;
    match option.to_lossy().as_str() {
        "collect" | "step" => {
            let collected = interp.collect_garbage().await?;
            Ok(MultiValue::single(LuaValue::Integer(collected as i64)))
        }
        "count" => Ok(MultiValue::single(LuaValue::Float(interp.gc_count_kb()))),
        "isrunning" => Ok(MultiValue::single(LuaValue::Boolean(true))),
        "stop" | "restart" | "incremental" | "generational" => {
            Ok(MultiValue::single(LuaValue::Integer(0)))
        }
        other => Err(LuaError::runtime(format!(
            "bad argument #1 to 'collectgarbage' (invalid option '{}')",
            other
        ))),
    }
}

/// Gather chunk bytes for `load`: a string directly, or a reader function
/// called until it returns nil or an empty string.
async fn load_input(interp: &Interpreter, chunk: &LuaValue) -> LuaResult<Vec<u8>> {
    match chunk {
        LuaValue::Str(s) => Ok(s.as_bytes().to_vec()),
        LuaValue::Function(_) => {
            let mut bytes = Vec::new();
            loop {
                let piece =
                    interp.call_value(chunk.clone(), Vec::new()).await?.into_first();
                match piece {
                    LuaValue::Nil => break,
                    LuaValue::Str(s) => {
                        if s.is_empty() {
                            break;
                        }
                        bytes.extend_from_slice(s.as_bytes());
                    }
                    other => {
                        return Err(LuaError::type_error(format!(
                            "reader function must return a string (got {})",
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(bytes)
        }
        other => Err(validation::bad_argument("load", 1, "string or function", other)),
    }
}

async fn lua_load(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let chunk = validation::check_any("load", &args, 1)?;
    let bytes = match load_input(&interp, &chunk).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Ok(MultiValue::from_vec(vec![LuaValue::Nil, err.value()]));
        }
    };
    let chunk_name = validation::opt_str("load", &args, 2, "=(load)")?.to_lossy();
    let mode = validation::opt_str("load", &args, 3, "bt")?.to_lossy();
    let env = match validation::arg(&args, 4) {
        LuaValue::Nil => None,
        value => Some(value),
    };
    match loader::load_chunk(&interp, &bytes, &chunk_name, &mode, env) {
        Ok(func) => Ok(MultiValue::single(func)),
        Err(err) => Ok(MultiValue::from_vec(vec![LuaValue::Nil, err.value()])),
    }
}

async fn lua_loadfile(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let path = validation::check_str("loadfile", &args, 1)?.to_lossy();
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) => {
            return Ok(MultiValue::from_vec(vec![
                LuaValue::Nil,
                LuaValue::from(format!("cannot open {}: {}", path, err)),
            ]));
        }
    };
    let mode = validation::opt_str("loadfile", &args, 2, "bt")?.to_lossy();
    let env = match validation::arg(&args, 3) {
        LuaValue::Nil => None,
        value => Some(value),
    };
    let chunk_name = format!("@{}", path);
    match loader::load_chunk(&interp, &bytes, &chunk_name, &mode, env) {
        Ok(func) => Ok(MultiValue::single(func)),
        Err(err) => Ok(MultiValue::from_vec(vec![LuaValue::Nil, err.value()])),
    }
}

async fn lua_dofile(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let path = validation::check_str("dofile", &args, 1)?.to_lossy();
    let bytes = std::fs::read(&path)
        .map_err(|err| LuaError::runtime(format!("cannot open {}: {}", path, err)))?;
    let chunk_name = format!("@{}", path);
    let func = loader::load_chunk(&interp, &bytes, &chunk_name, "bt", None)?;
    interp.call_value(func, Vec::new()).await
}

async fn lua_require(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let name = validation::check_str("require", &args, 1)?.to_lossy();
    let value = loader::require_module(&interp, &name).await?;
    Ok(MultiValue::single(value))
}

pub fn install(interp: &Interpreter, globals: &TableRef) {
    set(globals, "_G", LuaValue::Table(globals.clone()));
    set(globals, "_VERSION", LuaValue::from("Lua 5.4"));
    set(globals, "print", native("print", lua_print));
    set(globals, "type", native_sync("type", lua_type));
    set(globals, "tostring", native("tostring", lua_tostring));
    set(globals, "tonumber", native_sync("tonumber", lua_tonumber));
    set(globals, "ipairs", native_sync("ipairs", lua_ipairs));
    set(globals, "pairs", native("pairs", lua_pairs));
    set(globals, "next", native_sync("next", lua_next));
    set(globals, "select", native_sync("select", lua_select));
    set(globals, "rawget", native_sync("rawget", lua_rawget));
    set(globals, "rawset", native_sync("rawset", lua_rawset));
    set(globals, "rawequal", native_sync("rawequal", lua_rawequal));
    set(globals, "rawlen", native_sync("rawlen", lua_rawlen));
    set(globals, "assert", native_sync("assert", lua_assert));
    set(globals, "error", native_sync("error", lua_error));
    set(globals, "pcall", native("pcall", lua_pcall));
    set(globals, "xpcall", native("xpcall", lua_xpcall));
    set(globals, "setmetatable", native_sync("setmetatable", lua_setmetatable));
    set(globals, "getmetatable", native_sync("getmetatable", lua_getmetatable));
    set(globals, "collectgarbage", native("collectgarbage", lua_collectgarbage));
    set(globals, "load", native("load", lua_load));
    set(globals, "loadfile", native("loadfile", lua_loadfile));
    set(globals, "dofile", native("dofile", lua_dofile));
    set(globals, "require", native("require", lua_require));
}
