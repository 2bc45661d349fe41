//! The coroutine library, a thin surface over the scheduler.

use std::rc::Rc;

use crate::coroutine::{CoroutineStatus, LuaThread};
use crate::error_types::LuaResult;
use crate::interpreter::Interpreter;
use crate::stdlib::{native, native_sync, new_table, set, validation};
use crate::value::{LuaValue, MultiValue, TableRef};

fn lua_create(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let func = validation::check_function("create", &args, 1)?;
    Ok(MultiValue::single(LuaValue::Thread(LuaThread::new(func))))
}

fn lua_resume(interp: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let thread = validation::check_thread("resume", &args, 1)?;
    let rest = args.get(1..).map(<[LuaValue]>::to_vec).unwrap_or_default();
    match interp.resume_coroutine(&thread, rest) {
        Ok(values) => {
            let mut out = vec![LuaValue::Boolean(true)];
            out.extend(values.into_vec());
            Ok(MultiValue::from_vec(out))
        }
        Err(err) => Ok(MultiValue::from_vec(vec![LuaValue::Boolean(false), err.value()])),
    }
}

async fn lua_yield(interp: Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let resumed_with = interp.yield_values(args).await?;
    Ok(MultiValue::from_vec(resumed_with))
}

fn lua_status(interp: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let thread = validation::check_thread("status", &args, 1)?;
    let status = if interp
        .current_coroutine()
        .map(|current| Rc::ptr_eq(&current, &thread))
        .unwrap_or(false)
    {
        CoroutineStatus::Running
    } else {
        thread.status()
    };
    Ok(MultiValue::single(LuaValue::from(status.as_str())))
}

/// `wrap` returns a function that resumes the coroutine and re-raises its
/// errors in the caller.
fn lua_wrap(_: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let func = validation::check_function("wrap", &args, 1)?;
    let thread = LuaThread::new(func);
    let wrapped = native("wrapped_coroutine", move |interp: Interpreter, call_args| {
        let thread = thread.clone();
        async move { interp.resume_coroutine(&thread, call_args) }
    });
    Ok(MultiValue::single(wrapped))
}

fn lua_isyieldable(interp: &Interpreter, _args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    Ok(MultiValue::single(LuaValue::Boolean(interp.is_yieldable())))
}

fn lua_running(interp: &Interpreter, _args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let thread = interp.current_thread();
    let is_main = thread.is_main();
    Ok(MultiValue::from_vec(vec![LuaValue::Thread(thread), LuaValue::Boolean(is_main)]))
}

fn lua_close(interp: &Interpreter, args: Vec<LuaValue>) -> LuaResult<MultiValue> {
    let thread = validation::check_thread("close", &args, 1)?;
    match interp.close_coroutine(&thread) {
        Ok(()) => Ok(MultiValue::single(LuaValue::Boolean(true))),
        Err(err) => Ok(MultiValue::from_vec(vec![LuaValue::Boolean(false), err.value()])),
    }
}

pub fn install(_interp: &Interpreter, globals: &TableRef) {
    let coroutine = new_table();
    set(&coroutine, "create", native_sync("create", lua_create));
    set(&coroutine, "resume", native_sync("resume", lua_resume));
    set(&coroutine, "yield", native("yield", lua_yield));
    set(&coroutine, "status", native_sync("status", lua_status));
    set(&coroutine, "wrap", native_sync("wrap", lua_wrap));
    set(&coroutine, "isyieldable", native_sync("isyieldable", lua_isyieldable));
    set(&coroutine, "running", native_sync("running", lua_running));
    set(&coroutine, "close", native_sync("close", lua_close));
    set(globals, "coroutine", LuaValue::Table(coroutine));
}
