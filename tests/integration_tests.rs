//! End-to-end interpreter tests: whole programs in, return values out.

use moonwalk::{Interpreter, LuaValue};

fn run(source: &str) -> Vec<LuaValue> {
    let interp = Interpreter::new();
    match interp.run_source(source, "it") {
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
fn test_fibonacci_recursive_and_iterative() {
    let r = run(r#"
local function fib(n)
    if n < 2 then return n end
    return fib(n - 1) + fib(n - 2)
end
local a, b = 0, 1
for i = 1, 10 do a, b = b, a + b end
return fib(10), a
"#);
    assert_eq!(r, vec![int(55), int(55)]);
}

#[test]
fn test_counter_closures_are_independent() {
    let r = run(r#"
local function counter()
    local n = 0
    return function() n = n + 1 return n end
end
local c1, c2 = counter(), counter()
c1(); c1(); c1()
c2()
return c1(), c2()
"#);
    assert_eq!(r, vec![int(4), int(2)]);
}

#[test]
fn test_vector_objects_with_metatables() {
    let r = run(r#"
local Vec = {}
Vec.__index = Vec
function Vec.new(x, y)
    return setmetatable({x = x, y = y}, Vec)
end
function Vec.__add(a, b)
    return Vec.new(a.x + b.x, a.y + b.y)
end
function Vec:len2()
    return self.x * self.x + self.y * self.y
end
local v = Vec.new(1, 2) + Vec.new(3, 4)
return v.x, v.y, v:len2()
"#);
    assert_eq!(r, vec![int(4), int(6), int(52)]);
}

#[test]
fn test_coroutine_producer_consumer() {
    let r = run(r#"
local co = coroutine.create(function()
    for i = 1, 5 do coroutine.yield(i) end
end)
local sum = 0
while true do
    local ok, v = coroutine.resume(co)
    if not v then break end
    sum = sum + v
end
return sum, coroutine.status(co)
"#);
    assert_eq!(r, vec![int(15), s("dead")]);
}

#[test]
fn test_stateless_iterator_protocol() {
    let r = run(r#"
local function iter(t, i)
    i = i + 1
    if t[i] then return i, t[i] end
end
local sum = 0
for i, v in iter, {10, 20, 30}, 0 do sum = sum + v end
return sum
"#);
    assert_eq!(r, vec![int(60)]);
}

#[test]
fn test_varargs_forwarding_with_pack_unpack() {
    let r = run(r#"
local function collect(...)
    local t = table.pack(...)
    return t.n, table.unpack(t, 1, t.n)
end
return collect('a', nil, 'c')
"#);
    assert_eq!(r, vec![int(3), s("a"), LuaValue::Nil, s("c")]);
}

#[test]
fn test_nested_protected_calls() {
    let r = run(r#"
local ok, err = pcall(function()
    local ok2, err2 = pcall(error, 'inner')
    error({outer = (ok2 == false) and err2})
end)
return ok, type(err), err.outer
"#);
    assert_eq!(r, vec![LuaValue::Boolean(false), s("table"), s("inner")]);
}

#[test]
fn test_to_be_closed_in_function_call() {
    let r = run(r#"
local order = {}
local function tracked(tag)
    return setmetatable({}, {__close = function() order[#order + 1] = tag end})
end
local function work()
    local a <close> = tracked('a')
    local b <close> = tracked('b')
    return 'done'
end
local r = work()
return r, order[1], order[2]
"#);
    assert_eq!(r, vec![s("done"), s("b"), s("a")]);
}

#[test]
fn test_goto_driven_loop() {
    let r = run(r#"
local n, steps = 27, 0
do
    ::again::
    if n == 1 then goto done end
    if n % 2 == 0 then n = n // 2 else n = 3 * n + 1 end
    steps = steps + 1
    goto again
    ::done::
end
return steps
"#);
    assert_eq!(r, vec![int(111)]);
}

#[test]
fn test_load_into_sandbox_env() {
    let r = run(r#"
local env = {}
local f = load('x = 1 return x', 'sandbox', 't', env)
local r = f()
return r, env.x, x
"#);
    assert_eq!(r, vec![int(1), int(1), LuaValue::Nil]);
}

#[test]
fn test_numeric_for_at_integer_limit() {
    let r = run(r#"
local n = 0
for i = math.maxinteger - 2, math.maxinteger do n = n + 1 end
return n
"#);
    assert_eq!(r, vec![int(3)]);
}

#[test]
fn test_table_insert_remove_concat() {
    let r = run(r#"
local t = {'a', 'c'}
table.insert(t, 2, 'b')
table.insert(t, 'd')
local removed = table.remove(t, 1)
return removed, table.concat(t, '-'), #t
"#);
    assert_eq!(r, vec![s("a"), s("b-c-d"), int(3)]);
}

#[test]
fn test_string_methods_pipeline() {
    let r = run(r#"
local word = 'moonWALK'
return word:lower():upper():sub(1, 4), word:byte(1), ('x'):rep(3, '.')
"#);
    assert_eq!(r, vec![s("MOON"), int(109), s("x.x.x")]);
}

#[test]
fn test_multiple_returns_through_layers() {
    let r = run(r#"
local function three() return 1, 2, 3 end
local function pass() return three() end
local a, b, c = pass()
local t = {pass()}
return a + b + c, #t
"#);
    assert_eq!(r, vec![int(6), int(3)]);
}

#[test]
fn test_integer_and_float_identities() {
    let r = run(r#"
return 1 == 1.0, math.type(1) == math.type(1.0), 10 // 3, 10.0 // 3, 2^10
"#);
    assert_eq!(
        r,
        vec![
            LuaValue::Boolean(true),
            LuaValue::Boolean(false),
            int(3),
            LuaValue::Float(3.0),
            LuaValue::Float(1024.0),
        ]
    );
}

#[test]
fn test_wrapped_generator_drives_generic_for() {
    let r = run(r#"
local function range(n)
    return coroutine.wrap(function()
        for i = 1, n do coroutine.yield(i) end
    end)
end
local total = 0
for i in range(4) do total = total + i end
return total
"#);
    assert_eq!(r, vec![int(10)]);
}
