//! Number semantics: the integer/float/BigInt tower.
//!
//! Lua 5.4 keeps *integer* (i64, two's-complement wrap-around) and *float*
//! (f64) subtypes of `number`. A BigInt variant exists only to preserve the
//! identity of integer literals that do not fit in i64; arithmetic mixing a
//! BigInt with ordinary integers wraps back to i64.
//!
//! Comparisons between integers and floats are mathematically exact: no
//! operand is ever pushed through a lossy cast.

use std::cmp::Ordering;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

use crate::error_types::{LuaError, LuaResult};
use crate::value::LuaValue;

/// Arithmetic and bitwise operations the evaluator can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Unm,
    BAnd,
    BOr,
    BXor,
    BNot,
    Shl,
    Shr,
}

impl ArithOp {
    pub fn is_unary(self) -> bool {
        matches!(self, ArithOp::Unm | ArithOp::BNot)
    }

    fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::BNot | ArithOp::Shl | ArithOp::Shr
        )
    }
}

/// Internal numeric representation after coercion.
#[derive(Debug, Clone)]
enum Num {
    Int(i64),
    Float(f64),
    Big(Rc<BigInt>),
}

/// Wrap a BigInt to i64 with two's-complement truncation.
fn bigint_wrap(b: &BigInt) -> i64 {
    let low = b.iter_u64_digits().next().unwrap_or(0);
    if b.sign() == num_bigint::Sign::Minus {
        (low as i64).wrapping_neg()
    } else {
        low as i64
    }
}

/// Collapse a BigInt back to Integer when it fits.
pub fn normalize_bigint(b: BigInt) -> LuaValue {
    match b.to_i64() {
        Some(i) => LuaValue::Integer(i),
        None => LuaValue::BigInt(Rc::new(b)),
    }
}

fn to_num(v: &LuaValue) -> Option<Num> {
    match v {
        LuaValue::Integer(i) => Some(Num::Int(*i)),
        LuaValue::Float(f) => Some(Num::Float(*f)),
        LuaValue::BigInt(b) => Some(Num::Big(b.clone())),
        LuaValue::Str(s) => {
            let text = std::str::from_utf8(s.as_bytes()).ok()?;
            match parse_lua_number(text)? {
                LuaValue::Integer(i) => Some(Num::Int(i)),
                LuaValue::Float(f) => Some(Num::Float(f)),
                LuaValue::BigInt(b) => Some(Num::Big(b)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Coerce a value to a number the way arithmetic does (numbers pass through,
/// numeric strings parse with the literal grammar). `None` means the value is
/// not numeric at all.
pub fn coerce_to_number(v: &LuaValue) -> Option<LuaValue> {
    to_num(v).map(|n| match n {
        Num::Int(i) => LuaValue::Integer(i),
        Num::Float(f) => LuaValue::Float(f),
        Num::Big(b) => LuaValue::BigInt(b),
    })
}

/// Exact integer view of a float, when one exists.
pub fn float_to_integer_exact(f: f64) -> Option<i64> {
    if f.is_finite() && f == f.trunc() && f >= -9_223_372_036_854_775_808.0 && f < 9_223_372_036_854_775_808.0
    {
        Some(f as i64)
    } else {
        None
    }
}

fn num_to_integer(n: &Num) -> LuaResult<i64> {
    match n {
        Num::Int(i) => Ok(*i),
        Num::Float(f) => float_to_integer_exact(*f)
            .ok_or_else(|| LuaError::arith("number has no integer representation")),
        Num::Big(b) => b
            .to_i64()
            .ok_or_else(|| LuaError::arith("number has no integer representation")),
    }
}

/// Integer view used by bitwise operators and library functions; `None` means
/// the value is not numeric (so a metamethod may apply).
pub fn value_to_integer(v: &LuaValue) -> Option<LuaResult<i64>> {
    to_num(v).map(|n| num_to_integer(&n))
}

/// Silent exact-integer conversion, the `math.tointeger` behavior.
pub fn exact_integer(v: &LuaValue) -> Option<i64> {
    match v {
        LuaValue::Integer(i) => Some(*i),
        LuaValue::Float(f) => float_to_integer_exact(*f),
        LuaValue::BigInt(b) => b.to_i64(),
        _ => None,
    }
}

fn num_to_float(n: &Num) -> f64 {
    match n {
        Num::Int(i) => *i as f64,
        Num::Float(f) => *f,
        Num::Big(b) => b.to_f64().unwrap_or(f64::INFINITY),
    }
}

/// Floor division on integers; the sign of the result follows the divisor.
fn int_floor_div(a: i64, b: i64) -> LuaResult<i64> {
    if b == 0 {
        return Err(LuaError::arith("attempt to perform 'n//0'"));
    }
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && (a < 0) != (b < 0) {
        Ok(q.wrapping_sub(1))
    } else {
        Ok(q)
    }
}

fn int_mod(a: i64, b: i64) -> LuaResult<i64> {
    if b == 0 {
        return Err(LuaError::arith("attempt to perform 'n%%0'"));
    }
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        Ok(r.wrapping_add(b))
    } else {
        Ok(r)
    }
}

fn float_floor_div(x: f64, y: f64) -> f64 {
    (x / y).floor()
}

/// `x - floor(x/y)*y`, which gives the result the divisor's sign.
fn float_mod(x: f64, y: f64) -> f64 {
    let r = x % y;
    if r != 0.0 && (r < 0.0) != (y < 0.0) {
        r + y
    } else {
        r
    }
}

/// Logical shift left; counts of 64 or more in either direction produce 0.
fn shift_left(a: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((a as u64) << n) as i64
    } else {
        ((a as u64) >> -n) as i64
    }
}

fn num_is_integerish(n: &Num) -> bool {
    matches!(n, Num::Int(_) | Num::Big(_))
}

fn num_as_wrapped_int(n: &Num) -> i64 {
    match n {
        Num::Int(i) => *i,
        Num::Big(b) => bigint_wrap(b),
        Num::Float(_) => unreachable!("caller checked integer category"),
    }
}

/// Perform an arithmetic/bitwise operation on two values. Returns `None` when
/// an operand is not numeric, so the caller can fall back to metamethods.
/// Unary operations ignore `b`.
pub fn try_arith(op: ArithOp, a: &LuaValue, b: &LuaValue) -> Option<LuaResult<LuaValue>> {
    let x = to_num(a)?;
    let y = if op.is_unary() { x.clone() } else { to_num(b)? };

    if op.is_bitwise() {
        let result = (|| {
            let ix = num_to_integer(&x)?;
            Ok(match op {
                ArithOp::BAnd => LuaValue::Integer(ix & num_to_integer(&y)?),
                ArithOp::BOr => LuaValue::Integer(ix | num_to_integer(&y)?),
                ArithOp::BXor => LuaValue::Integer(ix ^ num_to_integer(&y)?),
                ArithOp::BNot => LuaValue::Integer(!ix),
                ArithOp::Shl => LuaValue::Integer(shift_left(ix, num_to_integer(&y)?)),
                ArithOp::Shr => LuaValue::Integer(shift_left(ix, num_to_integer(&y)?.wrapping_neg())),
                _ => unreachable!(),
            })
        })();
        return Some(result);
    }

    match op {
        // Always-float operations.
        ArithOp::Div => Some(Ok(LuaValue::Float(num_to_float(&x) / num_to_float(&y)))),
        ArithOp::Pow => Some(Ok(LuaValue::Float(num_to_float(&x).powf(num_to_float(&y))))),

        // Unary minus keeps BigInt exact so over-i64 literals can negate into
        // range (or stay exact for tostring).
        ArithOp::Unm => Some(Ok(match &x {
            Num::Int(i) => LuaValue::Integer(i.wrapping_neg()),
            Num::Float(f) => LuaValue::Float(-f),
            Num::Big(b) => normalize_bigint(-b.as_ref().clone()),
        })),

        _ => {
            if num_is_integerish(&x) && num_is_integerish(&y) {
                let ia = num_as_wrapped_int(&x);
                let ib = num_as_wrapped_int(&y);
                let result = match op {
                    ArithOp::Add => Ok(ia.wrapping_add(ib)),
                    ArithOp::Sub => Ok(ia.wrapping_sub(ib)),
                    ArithOp::Mul => Ok(ia.wrapping_mul(ib)),
                    ArithOp::IDiv => int_floor_div(ia, ib),
                    ArithOp::Mod => int_mod(ia, ib),
                    _ => unreachable!(),
                };
                Some(result.map(LuaValue::Integer))
            } else {
                let fa = num_to_float(&x);
                let fb = num_to_float(&y);
                let result = match op {
                    ArithOp::Add => fa + fb,
                    ArithOp::Sub => fa - fb,
                    ArithOp::Mul => fa * fb,
                    ArithOp::IDiv => float_floor_div(fa, fb),
                    ArithOp::Mod => float_mod(fa, fb),
                    _ => unreachable!(),
                };
                Some(Ok(LuaValue::Float(result)))
            }
        }
    }
}

/// Exact ordering between an i64 and an f64.
fn int_float_cmp(i: i64, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f >= 9_223_372_036_854_775_808.0 {
        return Some(Ordering::Less);
    }
    if f < -9_223_372_036_854_775_808.0 {
        return Some(Ordering::Greater);
    }
    let g = f.floor();
    let gi = g as i64;
    Some(match i.cmp(&gi) {
        Ordering::Equal => {
            if f > g {
                Ordering::Less
            } else {
                Ordering::Equal
            }
        }
        other => other,
    })
}

fn big_float_cmp(b: &BigInt, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f == f64::INFINITY {
        return Some(Ordering::Less);
    }
    if f == f64::NEG_INFINITY {
        return Some(Ordering::Greater);
    }
    let g = f.floor();
    let bg = BigInt::from_f64(g)?;
    Some(match b.cmp(&bg) {
        Ordering::Equal => {
            if f > g {
                Ordering::Less
            } else {
                Ordering::Equal
            }
        }
        other => other,
    })
}

/// Mathematically exact comparison of two numeric values. `None` means the
/// comparison is unordered (a NaN was involved). Only numeric variants are
/// accepted; callers handle strings and metamethods.
pub fn compare_numbers(a: &LuaValue, b: &LuaValue) -> Option<Ordering> {
    use LuaValue::{BigInt as Big, Float, Integer};
    match (a, b) {
        (Integer(x), Integer(y)) => Some(x.cmp(y)),
        (Float(x), Float(y)) => x.partial_cmp(y),
        (Integer(x), Float(y)) => int_float_cmp(*x, *y),
        (Float(x), Integer(y)) => int_float_cmp(*y, *x).map(Ordering::reverse),
        (Big(x), Big(y)) => Some(x.as_ref().cmp(y.as_ref())),
        (Big(x), Integer(y)) => Some(x.as_ref().cmp(&BigInt::from(*y))),
        (Integer(x), Big(y)) => Some(BigInt::from(*x).cmp(y.as_ref())),
        (Big(x), Float(y)) => big_float_cmp(x, *y),
        (Float(x), Big(y)) => big_float_cmp(y, *x).map(Ordering::reverse),
        _ => None,
    }
}

/// Equality across number subtypes; NaN is never equal to anything.
pub fn numbers_equal(a: &LuaValue, b: &LuaValue) -> bool {
    compare_numbers(a, b) == Some(Ordering::Equal)
}

fn is_decimal_float_text(s: &str) -> bool {
    s.contains('.') || s.contains('e') || s.contains('E')
}

/// Validate a decimal float body so Rust's parser cannot sneak in `inf`,
/// `NaN`, or other forms the Lua grammar rejects.
fn valid_decimal_float(s: &str) -> bool {
    let mut has_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => has_digit = true,
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if !seen_exp && has_digit => {
                seen_exp = true;
                // Optional sign, then at least one digit.
                if i + 1 < bytes.len() && (bytes[i + 1] == b'+' || bytes[i + 1] == b'-') {
                    i += 1;
                }
                if i + 1 >= bytes.len() || !bytes[i + 1].is_ascii_digit() {
                    return false;
                }
            }
            _ => return false,
        }
        i += 1;
    }
    has_digit
}

fn parse_hex_float(body: &str) -> Option<f64> {
    let bytes = body.as_bytes();
    let mut mantissa = 0.0f64;
    let mut any_digit = false;
    let mut frac_scale = 1.0f64;
    let mut in_frac = false;
    let mut exp: i32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'.' if !in_frac => in_frac = true,
            b'p' | b'P' => {
                if !any_digit {
                    return None;
                }
                let mut j = i + 1;
                let mut exp_sign = 1i32;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    if bytes[j] == b'-' {
                        exp_sign = -1;
                    }
                    j += 1;
                }
                if j >= bytes.len() {
                    return None;
                }
                let mut e: i32 = 0;
                while j < bytes.len() {
                    if !bytes[j].is_ascii_digit() {
                        return None;
                    }
                    e = e.saturating_mul(10).saturating_add((bytes[j] - b'0') as i32);
                    j += 1;
                }
                exp = exp_sign * e;
                i = j;
                continue;
            }
            _ => {
                let d = (c as char).to_digit(16)?;
                any_digit = true;
                if in_frac {
                    frac_scale /= 16.0;
                    mantissa += d as f64 * frac_scale;
                } else {
                    mantissa = mantissa * 16.0 + d as f64;
                }
            }
        }
        i += 1;
    }
    if !any_digit {
        return None;
    }
    Some(mantissa * (2.0f64).powi(exp))
}

/// Parse a string with the Lua numeral grammar: optional surrounding
/// whitespace, optional sign, decimal or hex forms including hex floats with
/// binary `p` exponents. Over-i64 integer literals become BigInt.
pub fn parse_lua_number(s: &str) -> Option<LuaValue> {
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if s.is_empty() {
        return None;
    }

    let (negative, rest) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if rest.is_empty() {
        return None;
    }

    if let Some(body) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        if body.is_empty() {
            return None;
        }
        if body.contains('.') || body.contains('p') || body.contains('P') {
            let f = parse_hex_float(body)?;
            return Some(LuaValue::Float(if negative { -f } else { f }));
        }
        if !body.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut big = BigInt::parse_bytes(body.as_bytes(), 16)?;
        if negative {
            big = -big;
        }
        return Some(normalize_bigint(big));
    }

    if is_decimal_float_text(rest) {
        if !valid_decimal_float(rest) {
            return None;
        }
        let f: f64 = rest.parse().ok()?;
        return Some(LuaValue::Float(if negative { -f } else { f }));
    }

    if !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Ok(i) = rest.parse::<i64>() {
        return Some(LuaValue::Integer(if negative { i.wrapping_neg() } else { i }));
    }
    let mut big = BigInt::parse_bytes(rest.as_bytes(), 10)?;
    if negative {
        big = -big;
    }
    Some(normalize_bigint(big))
}

/// Format a float the way `tostring` does: integral values keep a `.0`
/// suffix, extreme magnitudes use exponent notation, and every finite value
/// round-trips through `parse_lua_number`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan".to_string() } else { "nan".to_string() };
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf".to_string() } else { "inf".to_string() };
    }
    let abs = f.abs();
    if abs != 0.0 && (abs >= 1e16 || abs < 1e-4) {
        return format!("{:e}", f);
    }
    if f == f.trunc() {
        return format!("{:.1}", f);
    }
    format!("{}", f)
}

/// `tostring` for any numeric value.
pub fn format_number(v: &LuaValue) -> String {
    match v {
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Float(f) => format_float(*f),
        LuaValue::BigInt(b) => b.to_string(),
        _ => unreachable!("format_number on non-number"),
    }
}
