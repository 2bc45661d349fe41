//! Expression evaluation and the indexing/dispatch paths.
//!
//! Single-value evaluation (`eval_expr`) truncates multi-results; only the
//! dedicated multi-value entry points (`eval_expr_multi`, `eval_expr_list`)
//! expand them, and only at last-position sites.

use std::cmp::Ordering;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use num_bigint::BigInt;

use crate::ast::{BinOp, Expr, ExprKind, Numeral, TableEntry, UnOp};
use crate::env::Environment;
use crate::error_types::{LuaError, LuaResult};
use crate::interpreter::Interpreter;
use crate::lua_string::LuaStr;
use crate::metamethods::{self, Metamethod};
use crate::number::{self, ArithOp};
use crate::table::LuaTable;
use crate::value::{LuaValue, MultiValue};

/// `__index`/`__newindex` chains longer than this raise instead of looping.
const INDEX_CHAIN_LIMIT: usize = 100;

fn numeral_value(numeral: &Numeral) -> LuaValue {
    match numeral {
        Numeral::Int(i) => LuaValue::Integer(*i),
        Numeral::Float(f) => LuaValue::Float(*f),
        Numeral::Big(digits) => match BigInt::parse_bytes(digits.as_bytes(), 10) {
            Some(big) => number::normalize_bigint(big),
            None => LuaValue::Nil,
        },
    }
}

fn is_concatable(value: &LuaValue) -> bool {
    matches!(
        value,
        LuaValue::Str(_) | LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_)
    )
}

impl Interpreter {
    /// Evaluate to exactly one value.
    pub(crate) fn eval_expr<'a>(
        &'a self,
        expr: &'a Expr,
        env: &'a Rc<Environment>,
    ) -> LocalBoxFuture<'a, LuaResult<LuaValue>> {
        async move {
            match &expr.kind {
                ExprKind::NilLiteral => Ok(LuaValue::Nil),
                ExprKind::BoolLiteral(b) => Ok(LuaValue::Boolean(*b)),
                ExprKind::NumberLiteral(n) => Ok(numeral_value(n)),
                ExprKind::StringLiteral { bytes, .. } => {
                    Ok(LuaValue::Str(LuaStr::from_bytes(bytes)))
                }
                ExprKind::Identifier(name) => self.resolve_name(name, env).await,
                ExprKind::VarArg
                | ExprKind::FunctionCall { .. }
                | ExprKind::MethodCall { .. } => {
                    Ok(self.eval_expr_multi(expr, env).await?.into_first())
                }
                // Parentheses adjust to one value.
                ExprKind::Grouped(inner) => self.eval_expr(inner, env).await,
                ExprKind::BinaryOp { op, lhs, rhs } => {
                    self.eval_binary(*op, lhs, rhs, env).await
                }
                ExprKind::UnaryOp { op, operand } => self.eval_unary(*op, operand, env).await,
                ExprKind::TableFieldAccess { object, field } => {
                    let object = self.eval_expr(object, env).await?;
                    self.get_index(object, LuaValue::from(field.as_str())).await
                }
                ExprKind::TableIndexAccess { object, index } => {
                    let object = self.eval_expr(object, env).await?;
                    let key = self.eval_expr(index, env).await?;
                    self.get_index(object, key).await
                }
                ExprKind::TableConstructor { entries } => {
                    self.eval_table_constructor(entries, env).await
                }
                ExprKind::FunctionLiteral(body) => Ok(self.make_closure(body, env, None)),
            }
        }
        .boxed_local()
    }

    /// Evaluate keeping every value: calls, method calls, and `...` expand;
    /// everything else yields a single-value tuple.
    pub(crate) fn eval_expr_multi<'a>(
        &'a self,
        expr: &'a Expr,
        env: &'a Rc<Environment>,
    ) -> LocalBoxFuture<'a, LuaResult<MultiValue>> {
        async move {
            match &expr.kind {
                ExprKind::FunctionCall { func, args } => {
                    let callee = self.eval_expr(func, env).await?;
                    let args = self.eval_expr_list(args, env).await?;
                    self.call_value(callee, args).await
                }
                ExprKind::MethodCall { object, method, args } => {
                    let object = self.eval_expr(object, env).await?;
                    let callee =
                        self.get_index(object.clone(), LuaValue::from(method.as_str())).await?;
                    let mut full_args = vec![object];
                    full_args.extend(self.eval_expr_list(args, env).await?);
                    self.call_value(callee, full_args).await
                }
                ExprKind::VarArg => {
                    let values = env
                        .varargs()
                        .map(|va| va.as_ref().clone())
                        .unwrap_or_default();
                    Ok(MultiValue::from_vec(values))
                }
                _ => Ok(MultiValue::single(self.eval_expr(expr, env).await?)),
            }
        }
        .boxed_local()
    }

    /// Evaluate an expression list: every position truncates except the last,
    /// which expands.
    pub(crate) fn eval_expr_list<'a>(
        &'a self,
        exprs: &'a [Expr],
        env: &'a Rc<Environment>,
    ) -> LocalBoxFuture<'a, LuaResult<Vec<LuaValue>>> {
        async move {
            let mut out = Vec::with_capacity(exprs.len());
            for (i, expr) in exprs.iter().enumerate() {
                if i + 1 == exprs.len() {
                    out.extend(self.eval_expr_multi(expr, env).await?.into_vec());
                } else {
                    out.push(self.eval_expr(expr, env).await?);
                }
            }
            Ok(out)
        }
        .boxed_local()
    }

    /// Read a bare name: innermost visible binding, else `_ENV[name]`.
    pub(crate) async fn resolve_name(
        &self,
        name: &str,
        env: &Rc<Environment>,
    ) -> LuaResult<LuaValue> {
        if let Some(slot) = env.lookup(name) {
            return Ok(slot.get());
        }
        let env_value = env.get("_ENV").unwrap_or(LuaValue::Nil);
        self.get_index(env_value, LuaValue::from(name)).await
    }

    /// `t[k]` with the `__index` protocol.
    pub(crate) fn get_index<'a>(
        &'a self,
        object: LuaValue,
        key: LuaValue,
    ) -> LocalBoxFuture<'a, LuaResult<LuaValue>> {
        async move {
            let mut current = object;
            for _ in 0..INDEX_CHAIN_LIMIT {
                if let LuaValue::Table(t) = &current {
                    let raw = t.borrow().raw_get(&key);
                    if !raw.is_nil() {
                        return Ok(raw);
                    }
                    match metamethods::lookup(self, &current, Metamethod::Index) {
                        None => return Ok(LuaValue::Nil),
                        Some(LuaValue::Function(f)) => {
                            return Ok(self
                                .call_value(LuaValue::Function(f), vec![current, key])
                                .await?
                                .into_first());
                        }
                        Some(next) => current = next,
                    }
                } else {
                    match metamethods::lookup(self, &current, Metamethod::Index) {
                        None => {
                            return Err(LuaError::type_error(format!(
                                "attempt to index a {} value",
                                current.type_name()
                            )));
                        }
                        Some(LuaValue::Function(f)) => {
                            return Ok(self
                                .call_value(LuaValue::Function(f), vec![current, key])
                                .await?
                                .into_first());
                        }
                        Some(next) => current = next,
                    }
                }
            }
            Err(LuaError::runtime("'__index' chain too long; possible loop"))
        }
        .boxed_local()
    }

    /// `t[k] = v` with the `__newindex` protocol. Present keys are written
    /// directly; nil assignment removes and never fires the metamethod.
    pub(crate) fn set_index<'a>(
        &'a self,
        object: LuaValue,
        key: LuaValue,
        value: LuaValue,
    ) -> LocalBoxFuture<'a, LuaResult<()>> {
        async move {
            let mut current = object;
            for _ in 0..INDEX_CHAIN_LIMIT {
                if let LuaValue::Table(t) = &current {
                    let present = !t.borrow().raw_get(&key).is_nil();
                    if present || value.is_nil() {
                        return t.borrow_mut().raw_set(key, value);
                    }
                    match metamethods::lookup(self, &current, Metamethod::NewIndex) {
                        None => return t.borrow_mut().raw_set(key, value),
                        Some(LuaValue::Function(f)) => {
                            self.call_value(LuaValue::Function(f), vec![current, key, value])
                                .await?;
                            return Ok(());
                        }
                        Some(next) => current = next,
                    }
                } else {
                    match metamethods::lookup(self, &current, Metamethod::NewIndex) {
                        None => {
                            return Err(LuaError::type_error(format!(
                                "attempt to index a {} value",
                                current.type_name()
                            )));
                        }
                        Some(LuaValue::Function(f)) => {
                            self.call_value(LuaValue::Function(f), vec![current, key, value])
                                .await?;
                            return Ok(());
                        }
                        Some(next) => current = next,
                    }
                }
            }
            Err(LuaError::runtime("'__newindex' chain too long; possible loop"))
        }
        .boxed_local()
    }

    async fn eval_binary(
        &self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        env: &Rc<Environment>,
    ) -> LuaResult<LuaValue> {
        match op {
            BinOp::And => {
                let left = self.eval_expr(lhs, env).await?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                return self.eval_expr(rhs, env).await;
            }
            BinOp::Or => {
                let left = self.eval_expr(lhs, env).await?;
                if left.is_truthy() {
                    return Ok(left);
                }
                return self.eval_expr(rhs, env).await;
            }
            _ => {}
        }

        let left = self.eval_expr(lhs, env).await?;
        let right = self.eval_expr(rhs, env).await?;
        match op {
            BinOp::Add => self.arith(ArithOp::Add, left, right).await,
            BinOp::Sub => self.arith(ArithOp::Sub, left, right).await,
            BinOp::Mul => self.arith(ArithOp::Mul, left, right).await,
            BinOp::Div => self.arith(ArithOp::Div, left, right).await,
            BinOp::IDiv => self.arith(ArithOp::IDiv, left, right).await,
            BinOp::Mod => self.arith(ArithOp::Mod, left, right).await,
            BinOp::Pow => self.arith(ArithOp::Pow, left, right).await,
            BinOp::BAnd => self.arith(ArithOp::BAnd, left, right).await,
            BinOp::BOr => self.arith(ArithOp::BOr, left, right).await,
            BinOp::BXor => self.arith(ArithOp::BXor, left, right).await,
            BinOp::Shl => self.arith(ArithOp::Shl, left, right).await,
            BinOp::Shr => self.arith(ArithOp::Shr, left, right).await,
            BinOp::Concat => self.concat_values(left, right).await,
            BinOp::Eq => Ok(LuaValue::Boolean(self.values_equal(&left, &right).await?)),
            BinOp::Ne => Ok(LuaValue::Boolean(!self.values_equal(&left, &right).await?)),
            BinOp::Lt => Ok(LuaValue::Boolean(self.less_than(&left, &right, false).await?)),
            BinOp::Le => Ok(LuaValue::Boolean(self.less_than(&left, &right, true).await?)),
            BinOp::Gt => Ok(LuaValue::Boolean(self.less_than(&right, &left, false).await?)),
            BinOp::Ge => Ok(LuaValue::Boolean(self.less_than(&right, &left, true).await?)),
            BinOp::And | BinOp::Or => unreachable!("short-circuit ops handled above"),
        }
    }

    /// Arithmetic with metamethod fall-through: left operand's handler, then
    /// the right's.
    pub(crate) async fn arith(
        &self,
        op: ArithOp,
        left: LuaValue,
        right: LuaValue,
    ) -> LuaResult<LuaValue> {
        if let Some(result) = number::try_arith(op, &left, &right) {
            return result;
        }
        let event = Metamethod::from_arith(op);
        let handler = metamethods::lookup(self, &left, event)
            .or_else(|| metamethods::lookup(self, &right, event));
        match handler {
            Some(handler) => {
                Ok(self.call_value(handler, vec![left, right]).await?.into_first())
            }
            None => {
                let offender = if number::coerce_to_number(&left).is_none() { &left } else { &right };
                let verb = match op {
                    ArithOp::BAnd
                    | ArithOp::BOr
                    | ArithOp::BXor
                    | ArithOp::BNot
                    | ArithOp::Shl
                    | ArithOp::Shr => "perform bitwise operation on",
                    _ => "perform arithmetic on",
                };
                Err(LuaError::type_error(format!(
                    "attempt to {} a {} value",
                    verb,
                    offender.type_name()
                )))
            }
        }
    }

    /// `..`: primitive for string/number pairs, `__concat` otherwise.
    pub(crate) async fn concat_values(
        &self,
        left: LuaValue,
        right: LuaValue,
    ) -> LuaResult<LuaValue> {
        if is_concatable(&left) && is_concatable(&right) {
            let mut bytes = match &left {
                LuaValue::Str(s) => s.as_bytes().to_vec(),
                other => number::format_number(other).into_bytes(),
            };
            match &right {
                LuaValue::Str(s) => bytes.extend_from_slice(s.as_bytes()),
                other => bytes.extend_from_slice(number::format_number(other).as_bytes()),
            }
            return Ok(LuaValue::Str(LuaStr::from_vec(bytes)));
        }
        let handler = metamethods::lookup(self, &left, Metamethod::Concat)
            .or_else(|| metamethods::lookup(self, &right, Metamethod::Concat));
        match handler {
            Some(handler) => {
                Ok(self.call_value(handler, vec![left, right]).await?.into_first())
            }
            None => {
                let offender = if is_concatable(&left) { &right } else { &left };
                Err(LuaError::type_error(format!(
                    "attempt to concatenate a {} value",
                    offender.type_name()
                )))
            }
        }
    }

    /// `==` with `__eq` consulted only for same-typed tables/userdata whose
    /// raw comparison failed.
    pub(crate) async fn values_equal(
        &self,
        left: &LuaValue,
        right: &LuaValue,
    ) -> LuaResult<bool> {
        if left == right {
            return Ok(true);
        }
        let same_kind = matches!(
            (left, right),
            (LuaValue::Table(_), LuaValue::Table(_))
                | (LuaValue::UserData(_), LuaValue::UserData(_))
        );
        if !same_kind {
            return Ok(false);
        }
        let handler = metamethods::lookup(self, left, Metamethod::Eq)
            .or_else(|| metamethods::lookup(self, right, Metamethod::Eq));
        match handler {
            Some(handler) => Ok(self
                .call_value(handler, vec![left.clone(), right.clone()])
                .await?
                .into_first()
                .is_truthy()),
            None => Ok(false),
        }
    }

    /// `<` / `<=`: numbers exactly, strings bytewise, `__lt`/`__le`
    /// otherwise. A missing `__le` raises rather than falling back.
    pub(crate) async fn less_than(
        &self,
        left: &LuaValue,
        right: &LuaValue,
        or_equal: bool,
    ) -> LuaResult<bool> {
        let left_num = matches!(
            left,
            LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_)
        );
        let right_num = matches!(
            right,
            LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_)
        );
        if left_num && right_num {
            return Ok(match number::compare_numbers(left, right) {
                Some(Ordering::Less) => true,
                Some(Ordering::Equal) => or_equal,
                _ => false,
            });
        }
        if let (LuaValue::Str(a), LuaValue::Str(b)) = (left, right) {
            return Ok(if or_equal { a <= b } else { a < b });
        }
        let event = if or_equal { Metamethod::Le } else { Metamethod::Lt };
        let handler = metamethods::lookup(self, left, event)
            .or_else(|| metamethods::lookup(self, right, event));
        match handler {
            Some(handler) => Ok(self
                .call_value(handler, vec![left.clone(), right.clone()])
                .await?
                .into_first()
                .is_truthy()),
            None => {
                let a = left.type_name();
                let b = right.type_name();
                if a == b {
                    Err(LuaError::type_error(format!("attempt to compare two {} values", a)))
                } else {
                    Err(LuaError::type_error(format!("attempt to compare {} with {}", a, b)))
                }
            }
        }
    }

    async fn eval_unary(
        &self,
        op: UnOp,
        operand: &Expr,
        env: &Rc<Environment>,
    ) -> LuaResult<LuaValue> {
        let value = self.eval_expr(operand, env).await?;
        match op {
            UnOp::Not => Ok(LuaValue::Boolean(!value.is_truthy())),
            UnOp::Neg => self.arith(ArithOp::Unm, value.clone(), value).await,
            UnOp::BNot => self.arith(ArithOp::BNot, value.clone(), value).await,
            UnOp::Len => self.length_of(value).await,
        }
    }

    /// `#v`: byte length for strings; `__len` then border for tables.
    pub(crate) async fn length_of(&self, value: LuaValue) -> LuaResult<LuaValue> {
        if let LuaValue::Str(s) = &value {
            return Ok(LuaValue::Integer(s.len() as i64));
        }
        if let Some(handler) = metamethods::lookup(self, &value, Metamethod::Len) {
            return Ok(self.call_value(handler, vec![value]).await?.into_first());
        }
        if let LuaValue::Table(t) = &value {
            return Ok(LuaValue::Integer(t.borrow().length()));
        }
        Err(LuaError::type_error(format!(
            "attempt to get length of a {} value",
            value.type_name()
        )))
    }

    async fn eval_table_constructor(
        &self,
        entries: &[TableEntry],
        env: &Rc<Environment>,
    ) -> LuaResult<LuaValue> {
        let table = Rc::new(std::cell::RefCell::new(LuaTable::new()));
        let mut next_index: i64 = 1;
        for (i, entry) in entries.iter().enumerate() {
            match entry {
                TableEntry::Keyed { field, value } => {
                    let value = self.eval_expr(value, env).await?;
                    table.borrow_mut().raw_set(LuaValue::from(field.as_str()), value)?;
                }
                TableEntry::Indexed { key, value } => {
                    let key = self.eval_expr(key, env).await?;
                    let value = self.eval_expr(value, env).await?;
                    table.borrow_mut().raw_set(key, value)?;
                }
                TableEntry::Array(expr) => {
                    if i + 1 == entries.len() && expr.is_multivalue() {
                        for value in self.eval_expr_multi(expr, env).await? {
                            table.borrow_mut().raw_set(LuaValue::Integer(next_index), value)?;
                            next_index += 1;
                        }
                    } else {
                        let value = self.eval_expr(expr, env).await?;
                        table.borrow_mut().raw_set(LuaValue::Integer(next_index), value)?;
                        next_index += 1;
                    }
                }
            }
        }
        Ok(LuaValue::Table(table))
    }

    /// `tostring` semantics: `__tostring` wins, then a `__name` hint, then
    /// the default rendering.
    pub fn tostring_value<'a>(
        &'a self,
        value: &'a LuaValue,
    ) -> LocalBoxFuture<'a, LuaResult<String>> {
        async move {
            if let Some(handler) = metamethods::lookup(self, value, Metamethod::ToString) {
                let result =
                    self.call_value(handler, vec![value.clone()]).await?.into_first();
                return match result {
                    LuaValue::Str(s) => Ok(s.to_lossy()),
                    _ => Err(LuaError::type_error("'__tostring' must return a string")),
                };
            }
            Ok(value.default_tostring())
        }
        .boxed_local()
    }

    /// Error text for host-side reporting; re-entrancy guarded so a failing
    /// formatter cannot recurse.
    pub fn describe_error(&self, err: &LuaError) -> String {
        if self.state().error_formatting.replace(true) {
            return err.message();
        }
        let value = err.value();
        let text = match &value {
            LuaValue::Str(s) => s.to_lossy(),
            other => futures::executor::block_on(self.tostring_value(other))
                .unwrap_or_else(|_| err.message()),
        };
        self.state().error_formatting.set(false);
        text
    }
}
