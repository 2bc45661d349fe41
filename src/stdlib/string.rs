//! The string library (byte-oriented subset) and the shared string
//! metatable that makes `s:method(...)` dispatch work.

use crate::error_types::{LuaError, LuaResult};
use crate::interpreter::Interpreter;
use crate::loader;
use crate::lua_string::LuaStr;
use crate::stdlib::{native_sync, new_table, set, validation};
use crate::value::{LuaFunction, LuaValue, MultiValue, TableRef};

/// Translate Lua's 1-based, negative-friendly range onto byte offsets.
/// Returns an empty range when the bounds cross.
fn str_range(len: usize, i: i64, j: i64) -> (usize, usize) {
    let len = len as i64;
    let start = if i < 0 { (len + i + 1).max(1) } else { i.max(1) };
    let end = if j < 0 { len + j + 1 } else { j.min(len) };
    if start > end {
        (0, 0)
    } else {
        ((start - 1) as usize, end as usize)
    }
}

fn lua_len(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let s = validation::check_str("len", &args, 1)?;
    Ok(MultiValue::single(LuaValue::Integer(s.len() as i64)))
}

fn lua_sub(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let s = validation::check_str("sub", &args, 1)?;
    let i = validation::opt_int("sub", &args, 2, 1)?;
    let j = validation::opt_int("sub", &args, 3, -1)?;
    let (start, end) = str_range(s.len(), i, j);
    Ok(MultiValue::single(LuaValue::Str(LuaStr::from_bytes(&s.as_bytes()[start..end]))))
}

fn lua_byte(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let s = validation::check_str("byte", &args, 1)?;
    let i = validation::opt_int("byte", &args, 2, 1)?;
    let j = validation::opt_int("byte", &args, 3, i)?;
    let (start, end) = str_range(s.len(), i, j);
    let out = s.as_bytes()[start..end]
        .iter()
        .map(|&b| LuaValue::Integer(b as i64))
        .collect();
    Ok(MultiValue::from_vec(out))
}

fn lua_char(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let mut bytes = Vec::with_capacity(args.len());
    for index in 1..=args.len() {
        let code = validation::check_int("char", &args, index)?;
        if !(0..=255).contains(&code) {
            return Err(LuaError::runtime(format!(
                "bad argument #{} to 'char' (value out of range)",
                index
            )));
        }
        bytes.push(code as u8);
    }
    Ok(MultiValue::single(LuaValue::Str(LuaStr::from_vec(bytes))))
}

fn lua_rep(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let s = validation::check_str("rep", &args, 1)?;
    let n = validation::check_int("rep", &args, 2)?;
    let sep = validation::opt_str("rep", &args, 3, "")?;
    if n <= 0 {
        return Ok(MultiValue::single(LuaValue::from("")));
    }
    let mut bytes = Vec::with_capacity(s.len() * n as usize);
    for k in 0..n {
        if k > 0 {
            bytes.extend_from_slice(sep.as_bytes());
        }
        bytes.extend_from_slice(s.as_bytes());
    }
    Ok(MultiValue::single(LuaValue::Str(LuaStr::from_vec(bytes))))
}

fn lua_upper(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let s = validation::check_str("upper", &args, 1)?;
    let bytes = s.as_bytes().iter().map(u8::to_ascii_uppercase).collect();
    Ok(MultiValue::single(LuaValue::Str(LuaStr::from_vec(bytes))))
}

fn lua_lower(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let s = validation::check_str("lower", &args, 1)?;
    let bytes = s.as_bytes().iter().map(u8::to_ascii_lowercase).collect();
    Ok(MultiValue::single(LuaValue::Str(LuaStr::from_vec(bytes))))
}

fn lua_reverse(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let s = validation::check_str("reverse", &args, 1)?;
    let mut bytes = s.as_bytes().to_vec();
    bytes.reverse();
    Ok(MultiValue::single(LuaValue::Str(LuaStr::from_vec(bytes))))
}

/// Serialize a closure into a loadable binary chunk.
fn lua_dump(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let func = validation::check_function("dump", &args, 1)?;
    match &func {
        LuaValue::Function(LuaFunction::Lua(closure)) => {
            let bytes = loader::dump_function(closure)?;
            Ok(MultiValue::single(LuaValue::Str(LuaStr::from_vec(bytes))))
        }
        _ => Err(LuaError::runtime("unable to dump given function")),
    }
}

pub fn install(interp: &Interpreter, globals: &TableRef) {
    let string = new_table();
    set(&string, "len", native_sync("len", lua_len));
    set(&string, "sub", native_sync("sub", lua_sub));
    set(&string, "byte", native_sync("byte", lua_byte));
    set(&string, "char", native_sync("char", lua_char));
    set(&string, "rep", native_sync("rep", lua_rep));
    set(&string, "upper", native_sync("upper", lua_upper));
    set(&string, "lower", native_sync("lower", lua_lower));
    set(&string, "reverse", native_sync("reverse", lua_reverse));
    set(&string, "dump", native_sync("dump", lua_dump));
    set(globals, "string", LuaValue::Table(string.clone()));

    // Every string shares one metatable whose __index is the library table.
    let meta = interp.string_metatable();
    set(&meta, "__index", LuaValue::Table(string));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_range_positive() {
        assert_eq!(str_range(5, 2, 4), (1, 4));
        assert_eq!(str_range(5, 1, 99), (0, 5));
    }

    #[test]
    fn test_str_range_negative() {
        assert_eq!(str_range(5, -3, -1), (2, 5));
        assert_eq!(str_range(5, -99, 2), (0, 2));
    }

    #[test]
    fn test_str_range_empty() {
        assert_eq!(str_range(5, 4, 2), (0, 0));
        assert_eq!(str_range(0, 1, -1), (0, 0));
    }
}
