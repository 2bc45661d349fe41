//! Statement execution.
//!
//! The evaluator is a set of async methods on [`Interpreter`] returning boxed
//! local futures; recursion is boxed, and the only suspension point anywhere
//! is `coroutine.yield`. Non-local exits travel as the [`Exec`] signal sum:
//! `pcall` never catches them, and every scope they unwind through runs its
//! to-be-closed list.

pub mod call;
pub mod expression;

use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use num_traits::ToPrimitive;

use crate::ast::{AssignTarget, Block, Expr, FunctionBody, LocalAttrib, Stat, StatKind};
use crate::env::{Environment, SlotAttrib};
use crate::error_types::{LuaError, LuaResult};
use crate::interpreter::Interpreter;
use crate::metamethods::{self, Metamethod};
use crate::value::{Closure, LuaFunction, LuaValue, MultiValue};

pub use call::CallOutcome;

/// Typed non-local exits of statement execution.
#[derive(Debug)]
pub enum Exec {
    /// Fall through to the next statement.
    Normal,
    /// Caught by the nearest enclosing loop.
    Break,
    /// Caught by the innermost function frame.
    Return(MultiValue),
    /// Caught by the block owning the label.
    Goto(String),
    /// `return f(...)` in tail position; consumed by the call trampoline.
    TailCall { func: LuaValue, args: Vec<LuaValue> },
}

impl Interpreter {
    /// Execute the statements of a block in `env`, resolving gotos against
    /// the block's own labels.
    pub(crate) fn exec_block<'a>(
        &'a self,
        block: &'a Block,
        env: &'a Rc<Environment>,
    ) -> LocalBoxFuture<'a, LuaResult<Exec>> {
        async move {
            let mut index = 0;
            while index < block.stats.len() {
                let stat = &block.stats[index];
                match self.exec_statement(stat, env).await? {
                    Exec::Normal => index += 1,
                    Exec::Goto(label) => match block.label_position(&label) {
                        Some(pos) => index = pos + 1,
                        None => return Ok(Exec::Goto(label)),
                    },
                    other => return Ok(other),
                }
            }
            Ok(Exec::Normal)
        }
        .boxed_local()
    }

    /// Run a block in a fresh child scope and settle its close-list on the
    /// way out, whatever the exit.
    pub(crate) fn exec_block_scoped<'a>(
        &'a self,
        block: &'a Block,
        parent: &'a Rc<Environment>,
    ) -> LocalBoxFuture<'a, LuaResult<Exec>> {
        async move {
            let env = Environment::child(parent);
            let result = self.exec_block(block, &env).await;
            self.run_close_list(&env, result).await
        }
        .boxed_local()
    }

    /// Invoke `__close` on the scope's to-be-closed slots in reverse
    /// declaration order, passing the error in flight (nil on a clean exit).
    /// An error raised by a handler replaces the pending one.
    pub(crate) fn run_close_list<'a>(
        &'a self,
        env: &'a Rc<Environment>,
        result: LuaResult<Exec>,
    ) -> LocalBoxFuture<'a, LuaResult<Exec>> {
        async move {
            if !env.has_pending_close() {
                return result;
            }
            let slots = env.take_close_list();
            let (mut pending, exit) = match result {
                Ok(exec) => (None, Some(exec)),
                Err(err) => (Some(err), None),
            };
            for slot in slots.iter().rev() {
                let value = slot.get();
                if matches!(value, LuaValue::Nil | LuaValue::Boolean(false)) {
                    continue;
                }
                let err_value =
                    pending.as_ref().map(LuaError::value).unwrap_or(LuaValue::Nil);
                if let Some(handler) = metamethods::lookup(self, &value, Metamethod::Close) {
                    if let Err(close_err) =
                        self.call_value(handler, vec![value, err_value]).await
                    {
                        pending = Some(close_err);
                    }
                }
            }
            match pending {
                Some(err) => Err(err),
                None => Ok(exit.expect("exit preserved when no error pending")),
            }
        }
        .boxed_local()
    }

    fn exec_statement<'a>(
        &'a self,
        stat: &'a Stat,
        env: &'a Rc<Environment>,
    ) -> LocalBoxFuture<'a, LuaResult<Exec>> {
        async move {
            self.set_current_line(stat.span.line);
            let result = match &stat.kind {
                StatKind::ExpressionStatement { expr } => {
                    self.eval_expr_multi(expr, env).await?;
                    Ok(Exec::Normal)
                }
                StatKind::LocalDeclaration { names, values } => {
                    self.exec_local_declaration(names, values, env).await
                }
                StatKind::Assignment { targets, values } => {
                    self.exec_assignment(targets, values, env).await
                }
                StatKind::DoBlock { body } => self.exec_block_scoped(body, env).await,
                StatKind::If { cond, then_block, elseifs, else_block } => {
                    self.exec_if(cond, then_block, elseifs, else_block.as_ref(), env).await
                }
                StatKind::While { cond, body } => self.exec_while(cond, body, env).await,
                StatKind::RepeatUntil { body, cond } => self.exec_repeat(body, cond, env).await,
                StatKind::NumericFor { var, start, limit, step, body } => {
                    self.exec_numeric_for(var, start, limit, step.as_ref(), body, env).await
                }
                StatKind::GenericFor { names, exprs, body } => {
                    self.exec_generic_for(names, exprs, body, env).await
                }
                StatKind::FunctionDef { name_path, body, .. } => {
                    self.exec_function_def(name_path, body, env).await
                }
                StatKind::LocalFunctionDef { name, body } => {
                    // Declare first so the body sees its own name.
                    env.declare(name, LuaValue::Nil, SlotAttrib::Regular);
                    let closure = self.make_closure(body, env, Some(name.clone()));
                    if let Some(slot) = env.lookup(name) {
                        slot.set(closure);
                    }
                    Ok(Exec::Normal)
                }
                StatKind::Return { values } => self.exec_return(values, env).await,
                StatKind::Yield { values } => {
                    let values = self.eval_expr_list(values, env).await?;
                    self.yield_values(values).await?;
                    Ok(Exec::Normal)
                }
                StatKind::Break => Ok(Exec::Break),
                StatKind::Goto { label } => Ok(Exec::Goto(label.clone())),
                StatKind::Label { .. } => Ok(Exec::Normal),
            };
            result.map_err(|err| {
                let (chunk, line) = self.current_position();
                err.at(&chunk, line)
            })
        }
        .boxed_local()
    }

    async fn exec_local_declaration(
        &self,
        names: &[(String, LocalAttrib)],
        values: &[Expr],
        env: &Rc<Environment>,
    ) -> LuaResult<Exec> {
        let values = self.eval_expr_list(values, env).await?;
        for (i, (name, attrib)) in names.iter().enumerate() {
            let value = values.get(i).cloned().unwrap_or(LuaValue::Nil);
            let slot_attrib = match attrib {
                LocalAttrib::None => SlotAttrib::Regular,
                LocalAttrib::Const => SlotAttrib::Const,
                LocalAttrib::Close => SlotAttrib::Close,
            };
            if slot_attrib == SlotAttrib::Close
                && !matches!(value, LuaValue::Nil | LuaValue::Boolean(false))
                && metamethods::lookup(self, &value, Metamethod::Close).is_none()
            {
                return Err(LuaError::scope(format!(
                    "variable '{}' got a non-closable value",
                    name
                )));
            }
            env.declare(name, value, slot_attrib);
        }
        Ok(Exec::Normal)
    }

    async fn exec_assignment(
        &self,
        targets: &[AssignTarget],
        values: &[Expr],
        env: &Rc<Environment>,
    ) -> LuaResult<Exec> {
        let values = self.eval_expr_list(values, env).await?;
        for (i, target) in targets.iter().enumerate() {
            let value = values.get(i).cloned().unwrap_or(LuaValue::Nil);
            match target {
                AssignTarget::Name { name, .. } => self.assign_name(name, value, env).await?,
                AssignTarget::Field { object, field, .. } => {
                    let object = self.eval_expr(object, env).await?;
                    self.set_index(object, LuaValue::from(field.as_str()), value).await?;
                }
                AssignTarget::Index { object, index, .. } => {
                    let object = self.eval_expr(object, env).await?;
                    let key = self.eval_expr(index, env).await?;
                    self.set_index(object, key, value).await?;
                }
            }
        }
        Ok(Exec::Normal)
    }

    /// Write a bare name: the innermost visible binding, otherwise the
    /// global route through `_ENV` (honouring `__newindex`).
    pub(crate) async fn assign_name(
        &self,
        name: &str,
        value: LuaValue,
        env: &Rc<Environment>,
    ) -> LuaResult<()> {
        if let Some(slot) = env.lookup(name) {
            if slot.attrib() == SlotAttrib::Const {
                return Err(LuaError::scope(format!(
                    "attempt to assign to const variable '{}'",
                    name
                )));
            }
            slot.set(value);
            return Ok(());
        }
        let env_value = env.get("_ENV").unwrap_or(LuaValue::Nil);
        self.set_index(env_value, LuaValue::from(name), value).await
    }

    async fn exec_if(
        &self,
        cond: &Expr,
        then_block: &Block,
        elseifs: &[(Expr, Block)],
        else_block: Option<&Block>,
        env: &Rc<Environment>,
    ) -> LuaResult<Exec> {
        if self.eval_expr(cond, env).await?.is_truthy() {
            return self.exec_block_scoped(then_block, env).await;
        }
        for (elseif_cond, elseif_block) in elseifs {
            if self.eval_expr(elseif_cond, env).await?.is_truthy() {
                return self.exec_block_scoped(elseif_block, env).await;
            }
        }
        match else_block {
            Some(block) => self.exec_block_scoped(block, env).await,
            None => Ok(Exec::Normal),
        }
    }

    async fn exec_while(
        &self,
        cond: &Expr,
        body: &Block,
        env: &Rc<Environment>,
    ) -> LuaResult<Exec> {
        loop {
            if !self.eval_expr(cond, env).await?.is_truthy() {
                break;
            }
            match self.exec_block_scoped(body, env).await? {
                Exec::Normal => {}
                Exec::Break => break,
                other => return Ok(other),
            }
        }
        Ok(Exec::Normal)
    }

    /// `repeat ... until cond`; the condition is evaluated inside the body's
    /// scope, so it can see the iteration's locals.
    async fn exec_repeat(
        &self,
        body: &Block,
        cond: &Expr,
        env: &Rc<Environment>,
    ) -> LuaResult<Exec> {
        loop {
            let body_env = Environment::child(env);
            let result = self.exec_block(body, &body_env).await;
            match result {
                Ok(Exec::Normal) => {
                    let cond_result = self.eval_expr(cond, &body_env).await;
                    match cond_result {
                        Ok(value) => {
                            self.run_close_list(&body_env, Ok(Exec::Normal)).await?;
                            if value.is_truthy() {
                                break;
                            }
                        }
                        Err(err) => {
                            self.run_close_list(&body_env, Err(err)).await?;
                            unreachable!("close list propagates the pending error");
                        }
                    }
                }
                Ok(Exec::Break) => {
                    self.run_close_list(&body_env, Ok(Exec::Normal)).await?;
                    break;
                }
                other => {
                    let settled = self.run_close_list(&body_env, other).await?;
                    return Ok(settled);
                }
            }
        }
        Ok(Exec::Normal)
    }

    async fn exec_numeric_for(
        &self,
        var: &str,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
        env: &Rc<Environment>,
    ) -> LuaResult<Exec> {
        let start = for_number(self.eval_expr(start, env).await?, "initial value")?;
        let limit = for_number(self.eval_expr(limit, env).await?, "limit")?;
        let step = match step {
            Some(expr) => for_number(self.eval_expr(expr, env).await?, "step")?,
            None => LuaValue::Integer(1),
        };

        let all_integer = matches!(start, LuaValue::Integer(_))
            && matches!(limit, LuaValue::Integer(_))
            && matches!(step, LuaValue::Integer(_));

        if all_integer {
            let (a, b, s) = match (&start, &limit, &step) {
                (LuaValue::Integer(a), LuaValue::Integer(b), LuaValue::Integer(s)) => {
                    (*a, *b, *s)
                }
                _ => unreachable!(),
            };
            if s == 0 {
                return Err(LuaError::runtime("'for' step is zero"));
            }
            if (s > 0 && a > b) || (s < 0 && a < b) {
                return Ok(Exec::Normal);
            }
            // Iteration count computed in unsigned arithmetic so the loop
            // variable can wrap without overflowing the count.
            let count = if s > 0 {
                (b as u64).wrapping_sub(a as u64) / (s as u64)
            } else {
                (a as u64).wrapping_sub(b as u64) / s.unsigned_abs()
            };
            let mut value = a;
            let mut done: u64 = 0;
            loop {
                match self.exec_loop_body(var, LuaValue::Integer(value), body, env).await? {
                    LoopExit::Continue => {}
                    LoopExit::Break => break,
                    LoopExit::Propagate(exec) => return Ok(exec),
                }
                if done == count {
                    break;
                }
                done += 1;
                value = value.wrapping_add(s);
            }
        } else {
            let a = as_float(&start);
            let b = as_float(&limit);
            let s = as_float(&step);
            if s == 0.0 {
                return Err(LuaError::runtime("'for' step is zero"));
            }
            let mut value = a;
            while (s > 0.0 && value <= b) || (s < 0.0 && value >= b) {
                match self.exec_loop_body(var, LuaValue::Float(value), body, env).await? {
                    LoopExit::Continue => {}
                    LoopExit::Break => break,
                    LoopExit::Propagate(exec) => return Ok(exec),
                }
                value += s;
            }
        }
        Ok(Exec::Normal)
    }

    /// One loop iteration with a fresh scope binding the control variable;
    /// closures capture that iteration's variable, not a shared one.
    async fn exec_loop_body(
        &self,
        var: &str,
        value: LuaValue,
        body: &Block,
        env: &Rc<Environment>,
    ) -> LuaResult<LoopExit> {
        let body_env = Environment::child(env);
        body_env.declare(var, value, SlotAttrib::Regular);
        let result = self.exec_block(body, &body_env).await;
        match self.run_close_list(&body_env, result).await? {
            Exec::Normal => Ok(LoopExit::Continue),
            Exec::Break => Ok(LoopExit::Break),
            other => Ok(LoopExit::Propagate(other)),
        }
    }

    async fn exec_generic_for(
        &self,
        names: &[String],
        exprs: &[Expr],
        body: &Block,
        env: &Rc<Environment>,
    ) -> LuaResult<Exec> {
        let values = self.eval_expr_list(exprs, env).await?;
        let iterator = values.first().cloned().unwrap_or(LuaValue::Nil);
        let state = values.get(1).cloned().unwrap_or(LuaValue::Nil);
        let mut control = values.get(2).cloned().unwrap_or(LuaValue::Nil);

        loop {
            let results = self
                .call_value(iterator.clone(), vec![state.clone(), control.clone()])
                .await?;
            let first = results.first();
            if first.is_nil() {
                break;
            }
            control = first.clone();

            let body_env = Environment::child(env);
            for (i, name) in names.iter().enumerate() {
                body_env.declare(name, results.get(i), SlotAttrib::Regular);
            }
            let result = self.exec_block(body, &body_env).await;
            match self.run_close_list(&body_env, result).await? {
                Exec::Normal => {}
                Exec::Break => break,
                other => return Ok(other),
            }
        }
        Ok(Exec::Normal)
    }

    async fn exec_function_def(
        &self,
        name_path: &[String],
        body: &Rc<FunctionBody>,
        env: &Rc<Environment>,
    ) -> LuaResult<Exec> {
        let closure = self.make_closure(body, env, Some(name_path.join(".")));
        if name_path.len() == 1 {
            self.assign_name(&name_path[0], closure, env).await?;
            return Ok(Exec::Normal);
        }
        let mut target = self.resolve_name(&name_path[0], env).await?;
        for part in &name_path[1..name_path.len() - 1] {
            target = self.get_index(target, LuaValue::from(part.as_str())).await?;
        }
        let last = &name_path[name_path.len() - 1];
        self.set_index(target, LuaValue::from(last.as_str()), closure).await?;
        Ok(Exec::Normal)
    }

    async fn exec_return(&self, values: &[Expr], env: &Rc<Environment>) -> LuaResult<Exec> {
        // `return f(args)` with a sole, unparenthesized call is a tail call:
        // the frame is handed back to the trampoline instead of growing the
        // stack.
        if values.len() == 1 {
            match &values[0].kind {
                crate::ast::ExprKind::FunctionCall { func, args } => {
                    let callee = self.eval_expr(func, env).await?;
                    let args = self.eval_expr_list(args, env).await?;
                    return Ok(Exec::TailCall { func: callee, args });
                }
                crate::ast::ExprKind::MethodCall { object, method, args } => {
                    let object = self.eval_expr(object, env).await?;
                    let callee =
                        self.get_index(object.clone(), LuaValue::from(method.as_str())).await?;
                    let mut full_args = vec![object];
                    full_args.extend(self.eval_expr_list(args, env).await?);
                    return Ok(Exec::TailCall { func: callee, args: full_args });
                }
                _ => {}
            }
        }
        let values = self.eval_expr_list(values, env).await?;
        Ok(Exec::Return(MultiValue::from_vec(values)))
    }

    /// Build a closure over its definition environment.
    pub(crate) fn make_closure(
        &self,
        body: &Rc<FunctionBody>,
        env: &Rc<Environment>,
        name: Option<String>,
    ) -> LuaValue {
        let chunk = self
            .current_frames()
            .borrow()
            .last()
            .map(|frame| frame.chunk.clone())
            .unwrap_or_else(|| Rc::from("?"));
        LuaValue::Function(LuaFunction::Lua(Rc::new(Closure {
            body: body.clone(),
            env: env.clone(),
            chunk,
            name: std::cell::RefCell::new(name),
        })))
    }
}

enum LoopExit {
    Continue,
    Break,
    Propagate(Exec),
}

/// Control values of a numeric `for` must already be numbers.
fn for_number(value: LuaValue, what: &str) -> LuaResult<LuaValue> {
    match value {
        LuaValue::Integer(_) | LuaValue::Float(_) => Ok(value),
        LuaValue::BigInt(ref b) => Ok(match b.to_i64() {
            Some(i) => LuaValue::Integer(i),
            None => LuaValue::Float(b.to_f64().unwrap_or(f64::INFINITY)),
        }),
        _ => Err(LuaError::runtime(format!("'for' {} must be a number", what))),
    }
}

fn as_float(value: &LuaValue) -> f64 {
    match value {
        LuaValue::Integer(i) => *i as f64,
        LuaValue::Float(f) => *f,
        _ => unreachable!("for_number filtered other variants"),
    }
}
