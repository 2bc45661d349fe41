//! Error propagation: positions, protected calls, tracebacks, close-lists.

use moonwalk::error_types::ErrorKind;
use moonwalk::{Interpreter, LuaValue};

fn run(source: &str) -> Vec<LuaValue> {
    let interp = Interpreter::new();
    match interp.run_source(source, "err_test") {
        Ok(values) => values.into_vec(),
        Err(err) => panic!("script failed: {}", err.message()),
    }
}

fn fail(source: &str) -> moonwalk::LuaError {
    let interp = Interpreter::new();
    interp.run_source(source, "err_test").unwrap_err()
}

fn text(value: &LuaValue) -> String {
    match value {
        LuaValue::Str(s) => s.to_lossy(),
        other => panic!("expected string, got {}", other),
    }
}

#[test]
fn test_runtime_errors_carry_chunk_and_line() {
    let err = fail("local x = nil\nreturn x.field");
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.message().starts_with("err_test:2:"), "{}", err.message());
    assert!(err.message().contains("attempt to index a nil value"));
}

#[test]
fn test_error_with_level_zero_has_no_prefix() {
    let r = run("local ok, e = pcall(function() error('raw', 0) end) return e");
    assert_eq!(text(&r[0]), "raw");
}

#[test]
fn test_error_level_one_points_at_caller() {
    let r = run("local ok, e = pcall(function() error('lifted') end) return e");
    let msg = text(&r[0]);
    assert!(msg.starts_with("err_test:1:"), "{}", msg);
    assert!(msg.ends_with("lifted"));
}

#[test]
fn test_error_from_native_caller_keeps_message_bare() {
    let r = run("local ok, e = pcall(error, 'plain') return ok, e");
    assert_eq!(r[0], LuaValue::Boolean(false));
    assert_eq!(text(&r[1]), "plain");
}

#[test]
fn test_non_string_error_values_pass_through() {
    let r = run(
        "local sentinel = {} \
         local ok, e = pcall(function() error(sentinel) end) \
         return ok, e == sentinel",
    );
    assert_eq!(r, vec![LuaValue::Boolean(false), LuaValue::Boolean(true)]);
}

#[test]
fn test_assert_message_and_passthrough() {
    let r = run("return assert(1, 'unused'), select('#', assert(7, 8, 9))");
    assert_eq!(r[0], LuaValue::Integer(1));
    assert_eq!(r[1], LuaValue::Integer(3));
    let r = run("local ok, e = pcall(function() assert(false, 'custom') end) return e");
    assert_eq!(text(&r[0]), "custom");
    let r = run("local ok, e = pcall(function() assert(nil) end) return e");
    assert!(text(&r[0]).contains("assertion failed!"));
}

#[test]
fn test_pcall_does_not_catch_control_flow() {
    // break/goto are resolved statically inside the protected function, so a
    // protected call returning normally proves no signal leaked.
    let r = run(
        "local ok, v = pcall(function() \
           for i = 1, 3 do \
             if i == 2 then break end \
           end \
           return 'finished' \
         end) \
         return ok, v",
    );
    assert_eq!(r, vec![LuaValue::Boolean(true), LuaValue::from("finished")]);
}

#[test]
fn test_xpcall_handler_sees_original_message() {
    let r = run(
        "local seen \
         local ok, replaced = xpcall(function() error('source') end, function(e) \
           seen = e \
           return 'replacement' \
         end) \
         return ok, replaced, seen",
    );
    assert_eq!(r[0], LuaValue::Boolean(false));
    assert_eq!(text(&r[1]), "replacement");
    assert!(text(&r[2]).ends_with("source"));
}

#[test]
fn test_traceback_lists_call_chain() {
    let err = fail(
        "local function third() error('deep') end \
         local function second() third() end \
         local function first() second() end \
         first()",
    );
    let frames = err.traceback();
    assert!(frames.len() >= 3, "traceback too short: {:?}", frames);
    let rendered = err.format_traceback();
    assert!(rendered.contains("stack traceback:"));
    assert!(rendered.contains("third"));
}

#[test]
fn test_close_handlers_see_the_error_in_flight() {
    let r = run(
        "local seen \
         local ok = pcall(function() \
           local guard <close> = setmetatable({}, {__close = function(_, e) seen = e end}) \
           error('falling') \
         end) \
         return ok, seen",
    );
    assert_eq!(r[0], LuaValue::Boolean(false));
    assert!(text(&r[1]).ends_with("falling"));
}

#[test]
fn test_error_inside_close_replaces_original() {
    let r = run(
        "local ok, e = pcall(function() \
           local guard <close> = setmetatable({}, {__close = function() error('from close') end}) \
           error('original') \
         end) \
         return ok, e",
    );
    assert_eq!(r[0], LuaValue::Boolean(false));
    assert!(text(&r[1]).contains("from close"));
}

#[test]
fn test_non_closable_value_rejected_at_declaration() {
    let err = fail("local bad <close> = 5");
    assert_eq!(err.kind(), ErrorKind::Scope);
    assert!(err.message().contains("non-closable value"));
}

#[test]
fn test_runtime_type_errors_name_the_operation() {
    assert!(fail("return {} + 1").message().contains("attempt to perform arithmetic"));
    assert!(fail("return {} .. ''").message().contains("attempt to concatenate"));
    assert!(fail("local f = nil f()").message().contains("attempt to call a nil value"));
    assert!(fail("return #true").message().contains("attempt to get length"));
    assert!(fail("return 1 & 1.5").message().contains("no integer representation"));
}

#[test]
fn test_table_key_errors() {
    assert!(fail("local t = {} t[nil] = 1").message().contains("table index is nil"));
    assert!(fail("local t = {} t[0/0] = 1").message().contains("table index is NaN"));
}

#[test]
fn test_stack_overflow_is_an_error_not_a_crash() {
    let err = fail("local function f() return 1 + f() end f()");
    assert!(err.message().contains("stack overflow"), "{}", err.message());
}
