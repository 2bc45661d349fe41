//! Argument checking helpers shared by the library functions.
//!
//! Indices are 1-based to match the error message convention
//! `bad argument #2 to 'sub' (number expected, got string)`.

use crate::error_types::{LuaError, LuaResult};
use crate::lua_string::LuaStr;
use crate::number;
use crate::value::{LuaValue, TableRef};

pub fn bad_argument(name: &str, index: usize, expected: &str, got: &LuaValue) -> LuaError {
    LuaError::type_error(format!(
        "bad argument #{} to '{}' ({} expected, got {})",
        index,
        name,
        expected,
        got.type_name()
    ))
}

fn missing_argument(name: &str, index: usize, expected: &str) -> LuaError {
    LuaError::type_error(format!(
        "bad argument #{} to '{}' ({} expected, got no value)",
        index, name, expected
    ))
}

/// The argument at 1-based `index`, nil when absent.
pub fn arg(args: &[LuaValue], index: usize) -> LuaValue {
    args.get(index - 1).cloned().unwrap_or(LuaValue::Nil)
}

pub fn check_any(name: &str, args: &[LuaValue], index: usize) -> LuaResult<LuaValue> {
    args.get(index - 1)
        .cloned()
        .ok_or_else(|| missing_argument(name, index, "value"))
}

pub fn check_table(name: &str, args: &[LuaValue], index: usize) -> LuaResult<TableRef> {
    match args.get(index - 1) {
        Some(LuaValue::Table(t)) => Ok(t.clone()),
        Some(other) => Err(bad_argument(name, index, "table", other)),
        None => Err(missing_argument(name, index, "table")),
    }
}

pub fn check_function(name: &str, args: &[LuaValue], index: usize) -> LuaResult<LuaValue> {
    match args.get(index - 1) {
        Some(value @ LuaValue::Function(_)) => Ok(value.clone()),
        Some(other) => Err(bad_argument(name, index, "function", other)),
        None => Err(missing_argument(name, index, "function")),
    }
}

pub fn check_thread(
    name: &str,
    args: &[LuaValue],
    index: usize,
) -> LuaResult<std::rc::Rc<crate::coroutine::LuaThread>> {
    match args.get(index - 1) {
        Some(LuaValue::Thread(t)) => Ok(t.clone()),
        Some(other) => Err(bad_argument(name, index, "coroutine", other)),
        None => Err(missing_argument(name, index, "coroutine")),
    }
}

/// Strings, with the usual number-to-string coercion.
pub fn check_str(name: &str, args: &[LuaValue], index: usize) -> LuaResult<LuaStr> {
    match args.get(index - 1) {
        Some(LuaValue::Str(s)) => Ok(s.clone()),
        Some(n @ (LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_))) => {
            Ok(LuaStr::from(number::format_number(n)))
        }
        Some(other) => Err(bad_argument(name, index, "string", other)),
        None => Err(missing_argument(name, index, "string")),
    }
}

/// Numbers, with the usual string-to-number coercion.
pub fn check_number(name: &str, args: &[LuaValue], index: usize) -> LuaResult<LuaValue> {
    match args.get(index - 1) {
        Some(value) => number::coerce_to_number(value)
            .ok_or_else(|| bad_argument(name, index, "number", value)),
        None => Err(missing_argument(name, index, "number")),
    }
}

pub fn check_int(name: &str, args: &[LuaValue], index: usize) -> LuaResult<i64> {
    match args.get(index - 1) {
        Some(value) => match number::value_to_integer(value) {
            Some(result) => result,
            None => Err(bad_argument(name, index, "number", value)),
        },
        None => Err(missing_argument(name, index, "number")),
    }
}

pub fn opt_int(name: &str, args: &[LuaValue], index: usize, default: i64) -> LuaResult<i64> {
    match args.get(index - 1) {
        None | Some(LuaValue::Nil) => Ok(default),
        Some(_) => check_int(name, args, index),
    }
}

pub fn opt_str(name: &str, args: &[LuaValue], index: usize, default: &str) -> LuaResult<LuaStr> {
    match args.get(index - 1) {
        None | Some(LuaValue::Nil) => Ok(LuaStr::from(default)),
        Some(_) => check_str(name, args, index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_defaults_to_nil() {
        assert_eq!(arg(&[], 1), LuaValue::Nil);
        assert_eq!(arg(&[LuaValue::Integer(5)], 1), LuaValue::Integer(5));
    }

    #[test]
    fn test_check_int_coercion() {
        let args = vec![LuaValue::from("42")];
        assert_eq!(check_int("f", &args, 1).unwrap(), 42);
        let args = vec![LuaValue::Float(1.5)];
        assert!(check_int("f", &args, 1).is_err());
    }

    #[test]
    fn test_check_str_accepts_numbers() {
        let args = vec![LuaValue::Integer(7)];
        assert_eq!(check_str("f", &args, 1).unwrap().to_lossy(), "7");
    }

    #[test]
    fn test_error_message_shape() {
        let err = check_table("insert", &[LuaValue::Integer(1)], 1).unwrap_err();
        assert_eq!(err.message(), "bad argument #1 to 'insert' (table expected, got number)");
        let err = check_table("insert", &[], 1).unwrap_err();
        assert!(err.message().contains("got no value"));
    }
}
