//! The table library.

use crate::error_types::{LuaError, LuaResult};
use crate::interpreter::Interpreter;
use crate::lua_string::LuaStr;
use crate::number;
use crate::stdlib::{native_sync, new_table, set, validation};
use crate::value::{LuaValue, MultiValue, TableRef};

fn lua_insert(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let table = validation::check_table("insert", &args, 1)?;
    let n = table.borrow().length();
    let (pos, value) = match args.len() {
        2 => (n + 1, validation::arg(&args, 2)),
        3 => (validation::check_int("insert", &args, 2)?, validation::arg(&args, 3)),
        _ => return Err(LuaError::runtime("wrong number of arguments to 'insert'")),
    };
    if pos < 1 || pos > n + 1 {
        return Err(LuaError::runtime(
            "bad argument #2 to 'insert' (position out of bounds)",
        ));
    }
    let mut t = table.borrow_mut();
    let mut i = n;
    while i >= pos {
        let moved = t.raw_get(&LuaValue::Integer(i));
        t.raw_set(LuaValue::Integer(i + 1), moved)?;
        i -= 1;
    }
    t.raw_set(LuaValue::Integer(pos), value)?;
    Ok(MultiValue::empty())
}

fn lua_remove(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let table = validation::check_table("remove", &args, 1)?;
    let n = table.borrow().length();
    let pos = validation::opt_int("remove", &args, 2, n)?;
    if n == 0 && args.len() < 2 {
        return Ok(MultiValue::single(LuaValue::Nil));
    }
    if n > 0 && (pos < 1 || pos > n + 1) {
        return Err(LuaError::runtime(
            "bad argument #2 to 'remove' (position out of bounds)",
        ));
    }
    let mut t = table.borrow_mut();
    let removed = t.raw_get(&LuaValue::Integer(pos));
    let mut i = pos;
    while i < n {
        let moved = t.raw_get(&LuaValue::Integer(i + 1));
        t.raw_set(LuaValue::Integer(i), moved)?;
        i += 1;
    }
    if pos <= n {
        t.raw_set(LuaValue::Integer(n), LuaValue::Nil)?;
    }
    Ok(MultiValue::single(removed))
}

fn lua_concat(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let table = validation::check_table("concat", &args, 1)?;
    let sep = validation::opt_str("concat", &args, 2, "")?;
    let first = validation::opt_int("concat", &args, 3, 1)?;
    let last = validation::opt_int("concat", &args, 4, table.borrow().length())?;
    let mut bytes = Vec::new();
    let mut i = first;
    while i <= last {
        let value = table.borrow().raw_get(&LuaValue::Integer(i));
        match &value {
            LuaValue::Str(s) => bytes.extend_from_slice(s.as_bytes()),
            LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_) => {
                bytes.extend_from_slice(number::format_number(&value).as_bytes())
            }
            other => {
                return Err(LuaError::runtime(format!(
                    "invalid value (at index {}) in table for 'concat' (got {})",
                    i,
                    other.type_name()
                )));
            }
        }
        if i < last {
            bytes.extend_from_slice(sep.as_bytes());
        }
        i += 1;
    }
    Ok(MultiValue::single(LuaValue::Str(LuaStr::from_vec(bytes))))
}

fn lua_unpack(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let table = validation::check_table("unpack", &args, 1)?;
    let first = validation::opt_int("unpack", &args, 2, 1)?;
    let last = validation::opt_int("unpack", &args, 3, table.borrow().length())?;
    if last - first >= 1_000_000 {
        return Err(LuaError::runtime("too many results to unpack"));
    }
    let mut out = Vec::new();
    let mut i = first;
    while i <= last {
        out.push(table.borrow().raw_get(&LuaValue::Integer(i)));
        i += 1;
    }
    Ok(MultiValue::from_vec(out))
}

fn lua_pack(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let table = new_table();
    let n = args.len() as i64;
    {
        let mut t = table.borrow_mut();
        for (i, value) in args.into_iter().enumerate() {
            t.raw_set(LuaValue::Integer(i as i64 + 1), value)?;
        }
        t.raw_set(LuaValue::from("n"), LuaValue::Integer(n))?;
    }
    Ok(MultiValue::single(LuaValue::Table(table)))
}

pub fn install(_interp: &Interpreter, globals: &TableRef) {
    let table = new_table();
    set(&table, "insert", native_sync("insert", lua_insert));
    set(&table, "remove", native_sync("remove", lua_remove));
    set(&table, "concat", native_sync("concat", lua_concat));
    set(&table, "unpack", native_sync("unpack", lua_unpack));
    set(&table, "pack", native_sync("pack", lua_pack));
    set(globals, "table", LuaValue::Table(table));
}
