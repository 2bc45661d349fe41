//! The math library.

use rand::Rng;

use crate::error_types::{LuaError, LuaResult};
use crate::interpreter::Interpreter;
use crate::number;
use crate::stdlib::{native_sync, new_table, set, validation};
use crate::value::{LuaValue, MultiValue, TableRef};

/// Floats collapse back to integers when the result is exactly
/// representable, matching `math.floor`/`math.ceil` returning integers.
fn integral_result(f: f64) -> LuaValue {
    match number::float_to_integer_exact(f) {
        Some(i) => LuaValue::Integer(i),
        None => LuaValue::Float(f),
    }
}

fn as_float(value: &LuaValue) -> f64 {
    match value {
        LuaValue::Integer(i) => *i as f64,
        LuaValue::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn lua_abs(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_number("abs", &args, 1)?;
    Ok(MultiValue::single(match value {
        LuaValue::Integer(i) => LuaValue::Integer(i.wrapping_abs()),
        LuaValue::Float(f) => LuaValue::Float(f.abs()),
        other => other,
    }))
}

fn lua_floor(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_number("floor", &args, 1)?;
    Ok(MultiValue::single(match value {
        LuaValue::Integer(i) => LuaValue::Integer(i),
        LuaValue::Float(f) => integral_result(f.floor()),
        other => other,
    }))
}

fn lua_ceil(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_number("ceil", &args, 1)?;
    Ok(MultiValue::single(match value {
        LuaValue::Integer(i) => LuaValue::Integer(i),
        LuaValue::Float(f) => integral_result(f.ceil()),
        other => other,
    }))
}

fn lua_sqrt(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_number("sqrt", &args, 1)?;
    Ok(MultiValue::single(LuaValue::Float(as_float(&value).sqrt())))
}

fn lua_exp(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_number("exp", &args, 1)?;
    Ok(MultiValue::single(LuaValue::Float(as_float(&value).exp())))
}

fn lua_log(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let x = as_float(&validation::check_number("log", &args, 1)?);
    let result = match args.get(1) {
        None | Some(LuaValue::Nil) => x.ln(),
        Some(_) => {
            let base = as_float(&validation::check_number("log", &args, 2)?);
            x.log(base)
        }
    };
    Ok(MultiValue::single(LuaValue::Float(result)))
}

fn lua_sin(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_number("sin", &args, 1)?;
    Ok(MultiValue::single(LuaValue::Float(as_float(&value).sin())))
}

fn lua_cos(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_number("cos", &args, 1)?;
    Ok(MultiValue::single(LuaValue::Float(as_float(&value).cos())))
}

fn lua_tan(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_number("tan", &args, 1)?;
    Ok(MultiValue::single(LuaValue::Float(as_float(&value).tan())))
}

fn lua_fmod(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let x = validation::check_number("fmod", &args, 1)?;
    let y = validation::check_number("fmod", &args, 2)?;
    if let (LuaValue::Integer(a), LuaValue::Integer(b)) = (&x, &y) {
        if *b == 0 {
            return Err(LuaError::arith("bad argument #2 to 'fmod' (zero)"));
        }
        return Ok(MultiValue::single(LuaValue::Integer(a.wrapping_rem(*b))));
    }
    Ok(MultiValue::single(LuaValue::Float(as_float(&x) % as_float(&y))))
}

fn lua_modf(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_number("modf", &args, 1)?;
    let f = as_float(&value);
    let integral = f.trunc();
    let fractional = if f.is_infinite() { 0.0 } else { f - integral };
    Ok(MultiValue::from_vec(vec![
        integral_result(integral),
        LuaValue::Float(fractional),
    ]))
}

fn lua_tointeger(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_any("tointeger", &args, 1)?;
    let coerced = number::coerce_to_number(&value);
    let result = coerced
        .as_ref()
        .and_then(number::exact_integer)
        .map(LuaValue::Integer)
        .unwrap_or(LuaValue::Nil);
    Ok(MultiValue::single(result))
}

fn lua_math_type(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let value = validation::check_any("type", &args, 1)?;
    Ok(MultiValue::single(match value {
        LuaValue::Integer(_) | LuaValue::BigInt(_) => LuaValue::from("integer"),
        LuaValue::Float(_) => LuaValue::from("float"),
        _ => LuaValue::Nil,
    }))
}

fn extremum(name: &str, args: Vec<LuaValue>, want_greater: bool) -> LuaResult<MultiValue> {
    let mut best = validation::check_number(name, &args, 1)?;
    for index in 2..=args.len() {
        let candidate = validation::check_number(name, &args, index)?;
        let ordering = number::compare_numbers(&candidate, &best);
        let replace = match ordering {
            Some(std::cmp::Ordering::Greater) => want_greater,
            Some(std::cmp::Ordering::Less) => !want_greater,
            _ => false,
        };
        if replace {
            best = candidate;
        }
    }
    Ok(MultiValue::single(best))
}

fn lua_max(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    extremum("max", args, true)
}

fn lua_min(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    extremum("min", args, false)
}

fn lua_random(interp: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let mut rng = interp.state().rng.borrow_mut();
    match args.len() {
        0 => Ok(MultiValue::single(LuaValue::Float(rng.gen::<f64>()))),
        1 => {
            let m = validation::check_int("random", &args, 1)?;
            if m < 1 {
                return Err(LuaError::runtime(
                    "bad argument #1 to 'random' (interval is empty)",
                ));
            }
            Ok(MultiValue::single(LuaValue::Integer(rng.gen_range(1..=m))))
        }
        _ => {
            let m = validation::check_int("random", &args, 1)?;
            let n = validation::check_int("random", &args, 2)?;
            if m > n {
                return Err(LuaError::runtime(
                    "bad argument #2 to 'random' (interval is empty)",
                ));
            }
            Ok(MultiValue::single(LuaValue::Integer(rng.gen_range(m..=n))))
        }
    }
}

fn lua_randomseed(interp: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    use rand::SeedableRng;
    let seed = match args.first() {
        None | Some(LuaValue::Nil) => 0x2545F4914F6CDD1D,
        Some(_) => {
            let value = validation::check_number("randomseed", &args, 1)?;
            match value {
                LuaValue::Integer(i) => i as u64,
                LuaValue::Float(f) => f.to_bits(),
                _ => 0,
            }
        }
    };
    *interp.state().rng.borrow_mut() = rand::rngs::SmallRng::seed_from_u64(seed);
    Ok(MultiValue::empty())
}

pub fn install(_interp: &Interpreter, globals: &TableRef) {
    let math = new_table();
    set(&math, "pi", LuaValue::Float(std::f64::consts::PI));
    set(&math, "huge", LuaValue::Float(f64::INFINITY));
    set(&math, "maxinteger", LuaValue::Integer(i64::MAX));
    set(&math, "mininteger", LuaValue::Integer(i64::MIN));
    set(&math, "abs", native_sync("abs", lua_abs));
    set(&math, "floor", native_sync("floor", lua_floor));
    set(&math, "ceil", native_sync("ceil", lua_ceil));
    set(&math, "sqrt", native_sync("sqrt", lua_sqrt));
    set(&math, "exp", native_sync("exp", lua_exp));
    set(&math, "log", native_sync("log", lua_log));
    set(&math, "sin", native_sync("sin", lua_sin));
    set(&math, "cos", native_sync("cos", lua_cos));
    set(&math, "tan", native_sync("tan", lua_tan));
    set(&math, "fmod", native_sync("fmod", lua_fmod));
    set(&math, "modf", native_sync("modf", lua_modf));
    set(&math, "tointeger", native_sync("tointeger", lua_tointeger));
    set(&math, "type", native_sync("type", lua_math_type));
    set(&math, "max", native_sync("max", lua_max));
    set(&math, "min", native_sync("min", lua_min));
    set(&math, "random", native_sync("random", lua_random));
    set(&math, "randomseed", native_sync("randomseed", lua_randomseed));
    set(globals, "math", LuaValue::Table(math));
}
