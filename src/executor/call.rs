//! The function call protocol and the tail-call trampoline.
//!
//! `call_value` loops: interpreted closures that finish with a tail call
//! hand their callee back to the loop instead of recursing, so unbounded
//! tail recursion runs in constant stack. `__call` re-enters the loop with
//! the callable prepended to the arguments.

use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::env::{Environment, SlotAttrib};
use crate::error_types::{LuaError, LuaResult};
use crate::executor::Exec;
use crate::interpreter::Interpreter;
use crate::metamethods::{self, Metamethod};
use crate::value::{Closure, LuaFunction, LuaValue, MultiValue};

/// How an interpreted call left its frame.
pub enum CallOutcome {
    Return(MultiValue),
    Tail { func: LuaValue, args: Vec<LuaValue> },
}

impl Interpreter {
    /// Call any callable value with already-expanded arguments.
    pub fn call_value<'a>(
        &'a self,
        func: LuaValue,
        args: Vec<LuaValue>,
    ) -> LocalBoxFuture<'a, LuaResult<MultiValue>> {
        async move {
            let mut func = func;
            let mut args = args;
            loop {
                match func {
                    LuaValue::Function(LuaFunction::Lua(closure)) => {
                        match self.invoke_closure(&closure, args).await? {
                            CallOutcome::Return(values) => return Ok(values),
                            CallOutcome::Tail { func: next, args: next_args } => {
                                func = next;
                                args = next_args;
                            }
                        }
                    }
                    LuaValue::Function(LuaFunction::Native(native)) => {
                        if self.frame_depth() >= self.state().max_call_depth {
                            return Err(LuaError::runtime("stack overflow"));
                        }
                        self.push_frame(Some(native.name.clone()), Rc::from("[C]"), 0);
                        let mut result = (native.func)(self.clone(), args).await;
                        if let Err(err) = &mut result {
                            if let Some(frame) = self.current_trace_frame() {
                                err.trace_push(frame);
                            }
                        }
                        self.pop_frame();
                        return result;
                    }
                    other => match metamethods::lookup(self, &other, Metamethod::Call) {
                        Some(handler) => {
                            let mut with_self = Vec::with_capacity(args.len() + 1);
                            with_self.push(other);
                            with_self.append(&mut args);
                            args = with_self;
                            func = handler;
                        }
                        None => {
                            return Err(LuaError::type_error(format!(
                                "attempt to call a {} value",
                                other.type_name()
                            )));
                        }
                    },
                }
            }
        }
        .boxed_local()
    }

    /// Run one interpreted call frame: fresh scope on the closure's
    /// definition environment, positional parameter binding, vararg suffix,
    /// body execution, close-list settlement.
    fn invoke_closure<'a>(
        &'a self,
        closure: &'a Rc<Closure>,
        args: Vec<LuaValue>,
    ) -> LocalBoxFuture<'a, LuaResult<CallOutcome>> {
        async move {
            if self.frame_depth() >= self.state().max_call_depth {
                return Err(LuaError::runtime("stack overflow"));
            }
            let body = closure.body.clone();

            let extra = if body.is_vararg && args.len() > body.params.len() {
                args[body.params.len()..].to_vec()
            } else {
                Vec::new()
            };
            let env = Environment::function_scope(&closure.env, extra);
            for (i, param) in body.params.iter().enumerate() {
                let value = args.get(i).cloned().unwrap_or(LuaValue::Nil);
                env.declare(param, value, SlotAttrib::Regular);
            }

            self.push_frame(closure.name.borrow().clone(), closure.chunk.clone(), body.span.line);
            let result = self.exec_block(&body.block, &env).await;
            let result = self.run_close_list(&env, result).await;
            let outcome = match result {
                Ok(Exec::Return(values)) => Ok(CallOutcome::Return(values)),
                Ok(Exec::Normal) => Ok(CallOutcome::Return(MultiValue::empty())),
                Ok(Exec::TailCall { func, args }) => Ok(CallOutcome::Tail { func, args }),
                Ok(Exec::Break) => Err(LuaError::runtime("break outside a loop")),
                Ok(Exec::Goto(label)) => {
                    Err(LuaError::goto_label(format!("no visible label '{}'", label)))
                }
                Err(mut err) => {
                    if let Some(frame) = self.current_trace_frame() {
                        err.trace_push(frame);
                    }
                    Err(err)
                }
            };
            self.pop_frame();
            outcome
        }
        .boxed_local()
    }
}
