//! The interpreter handle and its shared state.
//!
//! `Interpreter` is a cheap `Rc` handle; evaluation methods live in
//! `executor/`, the scheduler in `coroutine.rs`. Cloning the handle is how
//! native functions and parked coroutine futures keep access to the one
//! mutable state machine (globals, call stacks, scheduler stack, registries).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::ast::{FunctionBody, Program, Span};
use crate::coroutine::LuaThread;
use crate::env::{Environment, SlotAttrib};
use crate::error_types::{LuaResult, TraceFrame};
use crate::gc::FinalizerRegistry;
use crate::loader::ModuleRegistry;
use crate::table::LuaTable;
use crate::value::{Closure, LuaFunction, LuaValue, MultiValue, TableRef};

/// One record of the Lua call stack.
pub(crate) struct Frame {
    pub name: Option<String>,
    pub chunk: Rc<str>,
    pub line: Cell<u32>,
}

pub(crate) struct VmState {
    pub(crate) globals: TableRef,
    pub(crate) string_meta: TableRef,
    pub(crate) main_thread: Rc<LuaThread>,
    /// Stack of coroutines between main and the running one; LIFO by
    /// construction.
    pub(crate) thread_stack: RefCell<Vec<Rc<LuaThread>>>,
    /// Non-zero while inside a protected call; yields are then forbidden.
    pub(crate) non_yieldable: Cell<usize>,
    pub(crate) max_call_depth: usize,
    pub(crate) finalizers: FinalizerRegistry,
    pub(crate) modules: RefCell<ModuleRegistry>,
    pub(crate) rng: RefCell<SmallRng>,
    /// Re-entrancy guard so a failing `__tostring` cannot recurse through
    /// error formatting.
    pub(crate) error_formatting: Cell<bool>,
}

/// A complete Lua interpreter.
#[derive(Clone)]
pub struct Interpreter {
    inner: Rc<VmState>,
}

impl Interpreter {
    /// A fresh interpreter with the standard library installed.
    pub fn new() -> Self {
        Self::with_max_depth(200)
    }

    /// A fresh interpreter with a custom Lua call-depth limit.
    pub fn with_max_depth(max_call_depth: usize) -> Self {
        let interp = Interpreter {
            inner: Rc::new(VmState {
                globals: Rc::new(RefCell::new(LuaTable::new())),
                string_meta: Rc::new(RefCell::new(LuaTable::new())),
                main_thread: LuaThread::main(),
                thread_stack: RefCell::new(Vec::new()),
                non_yieldable: Cell::new(0),
                max_call_depth,
                finalizers: FinalizerRegistry::new(),
                modules: RefCell::new(ModuleRegistry::new()),
                rng: RefCell::new(SmallRng::from_entropy()),
                error_formatting: Cell::new(false),
            }),
        };
        crate::stdlib::install(&interp);
        interp
    }

    pub(crate) fn state(&self) -> &VmState {
        &self.inner
    }

    /// The globals table (`_G`, and the default `_ENV`).
    pub fn globals(&self) -> TableRef {
        self.inner.globals.clone()
    }

    /// The shared metatable of all strings.
    pub fn string_metatable(&self) -> TableRef {
        self.inner.string_meta.clone()
    }

    /// Add a directory for `require` to search for modules.
    pub fn add_module_search_path(&self, path: std::path::PathBuf) {
        self.inner.modules.borrow_mut().add_search_path(path);
    }

    pub(crate) fn current_frames(&self) -> Rc<RefCell<Vec<Frame>>> {
        self.current_thread().frames.clone()
    }

    pub(crate) fn push_frame(&self, name: Option<String>, chunk: Rc<str>, line: u32) {
        self.current_frames()
            .borrow_mut()
            .push(Frame { name, chunk, line: Cell::new(line) });
    }

    pub(crate) fn pop_frame(&self) {
        self.current_frames().borrow_mut().pop();
    }

    pub(crate) fn frame_depth(&self) -> usize {
        self.current_frames().borrow().len()
    }

    pub(crate) fn set_current_line(&self, line: u32) {
        if let Some(frame) = self.current_frames().borrow().last() {
            frame.line.set(line);
        }
    }

    /// Chunk name and line of the innermost frame, for error prefixes.
    pub(crate) fn current_position(&self) -> (String, u32) {
        match self.current_frames().borrow().last() {
            Some(frame) => (frame.chunk.to_string(), frame.line.get()),
            None => ("?".to_string(), 0),
        }
    }

    /// Snapshot of the innermost frame as a trace record.
    pub(crate) fn current_trace_frame(&self) -> Option<TraceFrame> {
        self.current_frames().borrow().last().map(|frame| TraceFrame {
            name: frame.name.clone(),
            chunk: frame.chunk.to_string(),
            line: frame.line.get(),
        })
    }

    /// Render the live call stack, the `debug.traceback` body.
    pub fn traceback_string(&self, message: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(message) = message {
            out.push_str(message);
            out.push('\n');
        }
        out.push_str("stack traceback:");
        for frame in self.current_frames().borrow().iter().rev() {
            out.push_str("\n\t");
            out.push_str(&frame.chunk);
            out.push(':');
            out.push_str(&frame.line.get().to_string());
            match &frame.name {
                Some(name) => {
                    out.push_str(": in function '");
                    out.push_str(name);
                    out.push('\'');
                }
                None => out.push_str(": in main chunk"),
            }
        }
        out
    }

    /// Wrap a parsed chunk as a vararg function whose `_ENV` is `env` (the
    /// globals table when absent).
    pub fn load_program(
        &self,
        program: &Program,
        chunk_name: &str,
        env: Option<LuaValue>,
    ) -> LuaValue {
        let body = Rc::new(FunctionBody {
            params: Vec::new(),
            is_vararg: true,
            block: program.block.clone(),
            span: Span::new(0, 0),
        });
        let scope = Environment::root();
        let env_value = env.unwrap_or_else(|| LuaValue::Table(self.globals()));
        scope.declare("_ENV", env_value, SlotAttrib::Regular);
        LuaValue::Function(LuaFunction::Lua(Rc::new(Closure {
            body,
            env: scope,
            chunk: Rc::from(chunk_name),
            name: RefCell::new(None),
        })))
    }

    /// Execute an already-parsed chunk with the given script arguments.
    pub fn execute_chunk(
        &self,
        program: &Program,
        chunk_name: &str,
        args: Vec<LuaValue>,
    ) -> LuaResult<MultiValue> {
        let chunk = self.load_program(program, chunk_name, None);
        self.call_function(chunk, args)
    }

    /// Compile and run source text.
    pub fn run_source(&self, source: &str, chunk_name: &str) -> LuaResult<MultiValue> {
        let program = crate::loader::compile(source, chunk_name)?;
        self.execute_chunk(&program, chunk_name, Vec::new())
    }

    /// Call a Lua value from host code, driving evaluation to completion.
    pub fn call_function(&self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
        futures::executor::block_on(self.call_value(func, args))
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_types::ErrorKind;

    fn run(source: &str) -> LuaResult<Vec<LuaValue>> {
        let interp = Interpreter::new();
        interp.run_source(source, "test").map(MultiValue::into_vec)
    }

    fn run_ok(source: &str) -> Vec<LuaValue> {
        match run(source) {
            Ok(values) => values,
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
    fn test_arithmetic_subtypes() {
        assert_eq!(run_ok("return 1 + 2"), vec![int(3)]);
        assert_eq!(run_ok("return 7 // 2"), vec![int(3)]);
        assert_eq!(run_ok("return 7 / 2"), vec![LuaValue::Float(3.5)]);
        assert_eq!(run_ok("return 2^2"), vec![LuaValue::Float(4.0)]);
        assert_eq!(run_ok("return -7 % 3"), vec![int(2)]);
        assert_eq!(
            run_ok("return 3 & 5, 3 | 5, 3 ~ 5, ~0, 1 << 4, 256 >> 4"),
            vec![int(1), int(7), int(6), int(-1), int(16), int(16)]
        );
    }

    #[test]
    fn test_integer_overflow_wraps() {
        assert_eq!(
            run_ok("return math.maxinteger + 1 == math.mininteger"),
            vec![LuaValue::Boolean(true)]
        );
    }

    #[test]
    fn test_multivalue_in_table_constructor_last() {
        let r = run_ok("local t = {1, 2, (function() return 3, 4 end)()}; return #t, t[3], t[4]");
        assert_eq!(r, vec![int(4), int(3), int(4)]);
    }

    #[test]
    fn test_multivalue_not_last_truncates() {
        let r = run_ok("local t = {(function() return 3, 4 end)(), 5}; return #t, t[1], t[2]");
        assert_eq!(r, vec![int(2), int(3), int(5)]);
    }

    #[test]
    fn test_parentheses_adjust_to_one() {
        let r = run_ok(
            "local a, b = (function() return 1, 2 end)(); \
             local c, d = ((function() return 1, 2 end)()); \
             return a, b, c, d",
        );
        assert_eq!(r, vec![int(1), int(2), int(1), LuaValue::Nil]);
    }

    #[test]
    fn test_select_count_on_grouped_call() {
        let r = run_ok("local f = function() return 1, 2, 3 end; return select('#', (f()))");
        assert_eq!(r, vec![int(1)]);
        let r = run_ok("local f = function() return 1, 2, 3 end; return select('#', f())");
        assert_eq!(r, vec![int(3)]);
    }

    #[test]
    fn test_metatable_index_chain() {
        let r = run_ok(
            "local a = setmetatable({}, {__index={x=1}}); \
             local b = setmetatable({}, {__index=a}); \
             return b.x",
        );
        assert_eq!(r, vec![int(1)]);
    }

    #[test]
    fn test_metamethod_not_consulted_when_key_present() {
        let r = run_ok(
            "local hits = 0 \
             local t = setmetatable({k = 1}, {__index = function() hits = hits + 1 end}) \
             local _ = t.k \
             return hits",
        );
        assert_eq!(r, vec![int(0)]);
    }

    #[test]
    fn test_newindex_only_for_absent_keys() {
        let r = run_ok(
            "local writes = {} \
             local t = setmetatable({a = 1}, {__newindex = function(t, k, v) writes[#writes+1] = k end}) \
             t.a = 2 \
             t.b = 3 \
             return t.a, rawget(t, 'b'), writes[1], #writes",
        );
        assert_eq!(r, vec![int(2), LuaValue::Nil, s("b"), int(1)]);
    }

    #[test]
    fn test_close_order_on_normal_exit() {
        let r = run_ok(
            "local log = {} \
             do \
               local a <close> = setmetatable({}, {__close=function() log[#log+1] = 'a' end}) \
               local b <close> = setmetatable({}, {__close=function() log[#log+1] = 'b' end}) \
             end \
             return log[1], log[2]",
        );
        assert_eq!(r, vec![s("b"), s("a")]);
    }

    #[test]
    fn test_close_runs_on_break_and_error() {
        let r = run_ok(
            "local log = {} \
             for i = 1, 3 do \
               local a <close> = setmetatable({}, {__close=function() log[#log+1] = i end}) \
               if i == 2 then break end \
             end \
             return #log, log[1], log[2]",
        );
        assert_eq!(r, vec![int(2), int(1), int(2)]);

        let r = run_ok(
            "local seen \
             local ok, err = pcall(function() \
               local a <close> = setmetatable({}, {__close=function(_, e) seen = e end}) \
               error('boom') \
             end) \
             return ok, seen ~= nil",
        );
        assert_eq!(r, vec![LuaValue::Boolean(false), LuaValue::Boolean(true)]);
    }

    #[test]
    fn test_tail_call_depth() {
        let r = run_ok(
            "local function f(n) if n == 0 then return 'ok' end return f(n - 1) end \
             return f(1000000)",
        );
        assert_eq!(r, vec![s("ok")]);
    }

    #[test]
    fn test_coroutine_resume_yield_values() {
        let r = run_ok(
            "local c = coroutine.create(function(x) \
               local y = coroutine.yield(x + 1) \
               return y * 2 \
             end) \
             local ok, a = coroutine.resume(c, 10) \
             local ok2, b = coroutine.resume(c, 5) \
             return a, b, coroutine.status(c)",
        );
        assert_eq!(r, vec![int(11), int(10), s("dead")]);
    }

    #[test]
    fn test_coroutine_wrap_and_generator() {
        let r = run_ok(
            "local gen = coroutine.wrap(function() \
               for i = 1, 3 do coroutine.yield(i) end \
             end) \
             return gen() + gen() + gen()",
        );
        assert_eq!(r, vec![int(6)]);
    }

    #[test]
    fn test_resume_dead_coroutine_fails() {
        let r = run_ok(
            "local c = coroutine.create(function() end) \
             coroutine.resume(c) \
             local ok, err = coroutine.resume(c) \
             return ok, err",
        );
        assert_eq!(r[0], LuaValue::Boolean(false));
        assert_eq!(r[1], s("cannot resume dead coroutine"));
    }

    #[test]
    fn test_pcall_blocks_yield() {
        let r = run_ok(
            "local co = coroutine.wrap(function() return pcall(coroutine.yield) end) \
             local ok, err = co() \
             return ok, err",
        );
        assert_eq!(r[0], LuaValue::Boolean(false));
        match &r[1] {
            LuaValue::Str(msg) => {
                assert!(msg.to_lossy().contains("attempt to yield from outside a coroutine"))
            }
            other => panic!("expected string error, got {}", other),
        }
    }

    #[test]
    fn test_goto_into_local_scope_rejected() {
        let err = run("do goto L; local x = 1; ::L:: end").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert!(err.message().contains("jumps into the scope of local 'x'"), "{}", err.message());
    }

    #[test]
    fn test_backward_goto_accepted() {
        let r = run_ok(
            "local n = 0 \
             do \
               ::top:: \
               n = n + 1 \
               if n < 3 then goto top end \
             end \
             return n",
        );
        assert_eq!(r, vec![int(3)]);
    }

    #[test]
    fn test_goto_as_continue() {
        let r = run_ok(
            "local total = 0 \
             for i = 1, 5 do \
               if i % 2 == 0 then goto continue end \
               total = total + i \
               ::continue:: \
             end \
             return total",
        );
        assert_eq!(r, vec![int(9)]);
    }

    #[test]
    fn test_const_reassignment_rejected() {
        let err = run("local x <const> = 1; x = 2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert!(err.message().contains("const"));
    }

    #[test]
    fn test_shared_upvalue_between_closures() {
        let r = run_ok(
            "local function make() \
               local n = 0 \
               return function() n = n + 1 return n end, function() return n end \
             end \
             local bump, read = make() \
             bump(); bump() \
             return read()",
        );
        assert_eq!(r, vec![int(2)]);
    }

    #[test]
    fn test_loop_locals_fresh_per_iteration() {
        let r = run_ok(
            "local fns = {} \
             for i = 1, 3 do fns[i] = function() return i end end \
             return fns[1]() + fns[2]() + fns[3]()",
        );
        assert_eq!(r, vec![int(6)]);
    }

    #[test]
    fn test_env_is_the_global_route() {
        let r = run_ok("x = 10; return _ENV.x, _G.x");
        assert_eq!(r, vec![int(10), int(10)]);
        let r = run_ok(
            "local _ENV = {} \
             y = 5 \
             return y",
        );
        assert_eq!(r, vec![int(5)]);
    }

    #[test]
    fn test_global_write_respects_newindex_on_env() {
        let r = run_ok(
            "local captured = {} \
             local g = setmetatable({}, {__newindex = function(t, k, v) captured[k] = v end}) \
             do \
               local _ENV = g \
               z = 42 \
             end \
             return captured.z",
        );
        assert_eq!(r, vec![int(42)]);
    }

    #[test]
    fn test_varargs_expansion() {
        let r = run_ok(
            "local function f(...) return select('#', ...), ... end \
             return f(10, nil, 30)",
        );
        assert_eq!(r, vec![int(3), int(10), LuaValue::Nil, int(30)]);
    }

    #[test]
    fn test_numeric_for_float_contagion() {
        let r = run_ok(
            "local last \
             for i = 1, 2, 0.5 do last = i end \
             return math.type(last)",
        );
        assert_eq!(r, vec![s("float")]);
        let r = run_ok("local last for i = 1, 3 do last = i end return math.type(last)");
        assert_eq!(r, vec![s("integer")]);
    }

    #[test]
    fn test_numeric_for_zero_step_raises() {
        let err = run("for i = 1, 2, 0 do end").unwrap_err();
        assert!(err.message().contains("'for' step is zero"));
    }

    #[test]
    fn test_generic_for_over_pairs() {
        let r = run_ok(
            "local t = {4, 5, 6} \
             local keys, sum = 0, 0 \
             for k, v in pairs(t) do keys = keys + k sum = sum + v end \
             return keys, sum",
        );
        assert_eq!(r, vec![int(6), int(15)]);
    }

    #[test]
    fn test_ipairs_stops_at_hole() {
        let r = run_ok(
            "local t = {1, 2, nil, 4} \
             local n = 0 \
             for i in ipairs(t) do n = i end \
             return n",
        );
        assert_eq!(r, vec![int(2)]);
    }

    #[test]
    fn test_repeat_until_sees_body_locals() {
        let r = run_ok(
            "local n = 0 \
             repeat \
               local done = n >= 3 \
               n = n + 1 \
             until done \
             return n",
        );
        assert_eq!(r, vec![int(4)]);
    }

    #[test]
    fn test_string_methods_via_shared_metatable() {
        let r = run_ok("local s = 'hello' return s:upper(), s:len(), ('abc'):sub(2)");
        assert_eq!(r, vec![s("HELLO"), int(5), s("bc")]);
    }

    #[test]
    fn test_concat_coerces_numbers() {
        let r = run_ok("return 1 .. 2, 'v' .. 1.5");
        assert_eq!(r, vec![s("12"), s("v1.5")]);
    }

    #[test]
    fn test_comparison_rules() {
        let r = run_ok("return 1 < 1.5, 'a' < 'b', 2 == 2.0, 0/0 ~= 0/0");
        assert_eq!(
            r,
            vec![
                LuaValue::Boolean(true),
                LuaValue::Boolean(true),
                LuaValue::Boolean(true),
                LuaValue::Boolean(true)
            ]
        );
        let err = run("return 1 < 'x'").unwrap_err();
        assert!(err.message().contains("attempt to compare"));
    }

    #[test]
    fn test_comparison_does_not_coerce_strings() {
        let err = run("return 1 < '2'").unwrap_err();
        assert!(err.message().contains("attempt to compare"));
        // Arithmetic does coerce.
        assert_eq!(run_ok("return 1 + '2'"), vec![int(3)]);
    }

    #[test]
    fn test_error_values_preserved_by_pcall() {
        let r = run_ok(
            "local ok, err = pcall(function() error({code = 7}) end) \
             return ok, err.code",
        );
        assert_eq!(r, vec![LuaValue::Boolean(false), int(7)]);
    }

    #[test]
    fn test_error_string_gets_position_prefix() {
        let r = run_ok("local ok, err = pcall(function() error('bad') end) return err");
        match &r[0] {
            LuaValue::Str(msg) => {
                let text = msg.to_lossy();
                assert!(text.contains("test:"), "missing prefix: {}", text);
                assert!(text.ends_with("bad"));
            }
            other => panic!("expected string, got {}", other),
        }
    }

    #[test]
    fn test_xpcall_handler_replaces_error() {
        let r = run_ok(
            "local ok, msg = xpcall(function() error('x') end, function(e) return 'handled' end) \
             return ok, msg",
        );
        assert_eq!(r, vec![LuaValue::Boolean(false), s("handled")]);
    }

    #[test]
    fn test_tostring_tonumber_round_trip() {
        let r = run_ok(
            "return tonumber(tostring(9007199254740993)) == 9007199254740993, \
                    math.type(tonumber(tostring(-3))) == 'integer', \
                    tonumber(tostring(0.1)) == 0.1",
        );
        assert_eq!(
            r,
            vec![LuaValue::Boolean(true), LuaValue::Boolean(true), LuaValue::Boolean(true)]
        );
    }

    #[test]
    fn test_tostring_respects_metamethod() {
        let r = run_ok(
            "local t = setmetatable({}, {__tostring = function() return 'fancy' end}) \
             return tostring(t)",
        );
        assert_eq!(r, vec![s("fancy")]);
    }

    #[test]
    fn test_call_metamethod() {
        let r = run_ok(
            "local t = setmetatable({}, {__call = function(self, a, b) return a + b end}) \
             return t(2, 3)",
        );
        assert_eq!(r, vec![int(5)]);
    }

    #[test]
    fn test_eq_metamethod_same_type_only() {
        let r = run_ok(
            "local mt = {__eq = function() return true end} \
             local a = setmetatable({}, mt) \
             local b = setmetatable({}, mt) \
             return a == b, a == 1",
        );
        assert_eq!(r, vec![LuaValue::Boolean(true), LuaValue::Boolean(false)]);
    }

    #[test]
    fn test_len_metamethod() {
        let r = run_ok(
            "local t = setmetatable({}, {__len = function() return 42 end}) \
             return #t, #'four'",
        );
        assert_eq!(r, vec![int(42), int(4)]);
    }

    #[test]
    fn test_table_length_border() {
        let r = run_ok("local t = {1, 2, 3} t[#t] = nil return #t");
        assert_eq!(r, vec![int(2)]);
    }

    #[test]
    fn test_method_definition_and_call() {
        let r = run_ok(
            "local obj = {base = 10} \
             function obj:add(n) return self.base + n end \
             return obj:add(5)",
        );
        assert_eq!(r, vec![int(15)]);
    }

    #[test]
    fn test_load_text_chunk() {
        let r = run_ok(
            "local f = load('return 1 + 1') \
             local g, err = load('return +') \
             return f(), g, err ~= nil",
        );
        assert_eq!(r, vec![int(2), LuaValue::Nil, LuaValue::Boolean(true)]);
    }

    #[test]
    fn test_load_with_custom_env() {
        let r = run_ok(
            "local f = load('return x', 'chunk', 't', {x = 99}) \
             return f()",
        );
        assert_eq!(r, vec![int(99)]);
    }

    #[test]
    fn test_dump_and_reload() {
        let r = run_ok(
            "local up = 3 \
             local function f(n) return n + up end \
             local bin = string.dump(f) \
             local g = load(bin) \
             return g(4)",
        );
        assert_eq!(r, vec![int(7)]);
    }

    #[test]
    fn test_truncated_binary_chunk_rejected() {
        let r = run_ok(
            "local bin = string.dump(function() return 1 end) \
             local f, err = load(bin:sub(1, 8)) \
             return f, err",
        );
        assert_eq!(r[0], LuaValue::Nil);
        match &r[1] {
            LuaValue::Str(msg) => assert!(msg.to_lossy().contains("truncated")),
            other => panic!("expected string, got {}", other),
        }
    }

    #[test]
    fn test_script_exit_values() {
        let interp = Interpreter::new();
        let program = crate::loader::compile("return ...", "args").unwrap();
        let out = interp.execute_chunk(&program, "args", vec![int(1), s("two")]).unwrap();
        assert_eq!(out.into_vec(), vec![int(1), s("two")]);
    }

    #[test]
    fn test_runtime_error_carries_traceback() {
        let interp = Interpreter::new();
        let err = interp
            .run_source(
                "local function inner() error('deep') end \
                 local function outer() inner() end \
                 outer()",
                "trace",
            )
            .unwrap_err();
        assert!(err.message().contains("deep"));
        assert!(!err.traceback().is_empty());
    }
}
