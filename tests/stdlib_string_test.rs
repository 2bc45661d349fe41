//! string library behavior, driven through scripts.

use moonwalk::{Interpreter, LuaValue};

fn run(source: &str) -> Vec<LuaValue> {
    let interp = Interpreter::new();
    match interp.run_source(source, "string_test") {
        Ok(values) => values.into_vec(),
        Err(err) => panic!("script failed: {}", err.message()),
    }
}

fn int(i: i64) -> LuaValue {
    LuaValue::Integer(i)
}

fn s(text: &str) -> LuaValue {
    LuaValue::from(text)
}

#[test]
fn test_len_counts_bytes() {
    let r = run("return string.len('hello'), #'hello', (''):len()");
    assert_eq!(r, vec![int(5), int(5), int(0)]);
}

#[test]
fn test_sub_index_rules() {
    let r = run(
        "local t = 'interpreter' \
         return t:sub(1, 5), t:sub(-5), t:sub(6, 3), t:sub(-100, 100)",
    );
    assert_eq!(r, vec![s("inter"), s("reter"), s(""), s("interpreter")]);
}

#[test]
fn test_byte_and_char_round_trip() {
    let r = run(
        "local a, b, c = string.byte('abc', 1, 3) \
         return a, b, c, string.char(a, b, c)",
    );
    assert_eq!(r, vec![int(97), int(98), int(99), s("abc")]);
}

#[test]
fn test_char_range_check() {
    let interp = Interpreter::new();
    let err = interp.run_source("return string.char(300)", "string_test").unwrap_err();
    assert!(err.message().contains("value out of range"));
}

#[test]
fn test_rep_with_separator() {
    let r = run("return string.rep('ab', 3), string.rep('x', 2, '-'), string.rep('y', 0)");
    assert_eq!(r, vec![s("ababab"), s("x-x"), s("")]);
}

#[test]
fn test_case_conversion_is_ascii_only() {
    let r = run("return string.upper('mix3d'), string.lower('MIX3D')");
    assert_eq!(r, vec![s("MIX3D"), s("mix3d")]);
}

#[test]
fn test_reverse() {
    let r = run("return string.reverse('stressed')");
    assert_eq!(r, vec![s("desserts")]);
}

#[test]
fn test_numbers_coerce_to_strings() {
    let r = run("return string.len(12345), string.rep(7, 3)");
    assert_eq!(r, vec![int(5), s("777")]);
}

#[test]
fn test_method_dispatch_through_string_metatable() {
    let r = run("local greeting = 'hi' return greeting:upper(), greeting:rep(2)");
    assert_eq!(r, vec![s("HI"), s("hihi")]);
}

#[test]
fn test_dump_round_trips_through_load() {
    let r = run(
        "local base = 100 \
         local function add(n) return base + n end \
         local chunk = string.dump(add) \
         local again = load(chunk) \
         return again(1), again(2)",
    );
    assert_eq!(r, vec![int(101), int(102)]);
}

#[test]
fn test_dump_rejects_host_functions() {
    let interp = Interpreter::new();
    let err = interp.run_source("return string.dump(print)", "string_test").unwrap_err();
    assert!(err.message().contains("unable to dump given function"));
}
