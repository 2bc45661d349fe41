//! Load-time semantic checks.
//!
//! A pre-pass over the parsed tree rejects programs the evaluator must never
//! see: assignment to `<const>`/`<close>` locals, duplicate labels, gotos
//! that would jump into the scope of a local, unresolved labels, `break`
//! outside a loop, `...` outside a vararg function, and more than one
//! `<close>` in a single declaration list.

use crate::ast::{
    AssignTarget, Block, Expr, ExprKind, FunctionBody, LocalAttrib, Program, Stat, StatKind,
    TableEntry,
};
use crate::error_types::{LuaError, LuaResult};

struct LabelInfo {
    name: String,
    n_locals: usize,
}

struct GotoInfo {
    name: String,
    n_locals: usize,
    line: u32,
}

#[derive(Default)]
struct Scope {
    locals: Vec<(String, LocalAttrib)>,
    labels: Vec<LabelInfo>,
    gotos: Vec<GotoInfo>,
}

struct FuncCtx {
    is_vararg: bool,
    loop_depth: usize,
    /// Index into the scope stack where this function's scopes begin.
    scope_base: usize,
}

struct Checker<'a> {
    chunk: &'a str,
    scopes: Vec<Scope>,
    functions: Vec<FuncCtx>,
}

/// Validate a chunk; the main body is a vararg function.
pub fn check_program(program: &Program, chunk: &str) -> LuaResult<()> {
    let mut checker = Checker { chunk, scopes: Vec::new(), functions: Vec::new() };
    checker.check_function(&program.block, &[], true)
}

impl<'a> Checker<'a> {
    fn err(&self, line: u32, message: String) -> LuaError {
        LuaError::syntax(self.chunk, line, message)
    }

    fn current_function(&mut self) -> &mut FuncCtx {
        self.functions.last_mut().expect("inside a function context")
    }

    fn check_function(
        &mut self,
        block: &Block,
        params: &[String],
        is_vararg: bool,
    ) -> LuaResult<()> {
        self.functions.push(FuncCtx { is_vararg, loop_depth: 0, scope_base: self.scopes.len() });
        let result = self.check_block(block, params);
        self.functions.pop();
        result
    }

    /// Check a block in a new scope seeded with `pre_locals` (parameters or
    /// loop variables), then resolve its labels and gotos.
    fn check_block(&mut self, block: &Block, pre_locals: &[String]) -> LuaResult<()> {
        self.push_scope(pre_locals);
        let result = self.check_stats(block);
        self.resolve_scope(result)
    }

    fn push_scope(&mut self, pre_locals: &[String]) {
        let mut scope = Scope::default();
        for name in pre_locals {
            scope.locals.push((name.clone(), LocalAttrib::None));
        }
        self.scopes.push(scope);
    }

    fn check_stats(&mut self, block: &Block) -> LuaResult<()> {
        for stat in &block.stats {
            self.check_stat(stat)?;
        }
        Ok(())
    }

    /// Pop the current scope, matching its pending gotos against its labels.
    /// A forward goto that would skip a local declaration is rejected here;
    /// unmatched gotos bubble into the parent scope, or fail at the function
    /// boundary.
    fn resolve_scope(&mut self, result: LuaResult<()>) -> LuaResult<()> {
        let scope = self.scopes.pop().expect("scope pushed by caller");
        result?;
        let boundary = self.current_function_scope_base();
        for pending in scope.gotos {
            match scope.labels.iter().find(|l| l.name == pending.name) {
                Some(label) => {
                    if label.n_locals > pending.n_locals {
                        let local_name = &scope.locals[pending.n_locals].0;
                        return Err(LuaError::syntax_plain(format!(
                            "<goto {}> at line {} jumps into the scope of local '{}'",
                            pending.name, pending.line, local_name
                        )));
                    }
                }
                None => {
                    if self.scopes.len() > boundary {
                        let parent = self.scopes.last_mut().expect("parent scope");
                        let n_locals = parent.locals.len();
                        parent.gotos.push(GotoInfo { name: pending.name, n_locals, line: pending.line });
                    } else {
                        return Err(self.err(
                            pending.line,
                            format!("no visible label '{}' for goto", pending.name),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn current_function_scope_base(&self) -> usize {
        self.functions.last().map(|f| f.scope_base).unwrap_or(0)
    }

    fn declare_local(&mut self, name: &str, attrib: LocalAttrib) {
        self.scopes
            .last_mut()
            .expect("scope pushed by caller")
            .locals
            .push((name.to_string(), attrib));
    }

    /// Lexical lookup across the whole scope stack (upvalues included).
    fn lookup_attrib(&self, name: &str) -> Option<LocalAttrib> {
        for scope in self.scopes.iter().rev() {
            for (local, attrib) in scope.locals.iter().rev() {
                if local == name {
                    return Some(*attrib);
                }
            }
        }
        None
    }

    fn check_stat(&mut self, stat: &Stat) -> LuaResult<()> {
        let line = stat.span.line;
        match &stat.kind {
            StatKind::LocalDeclaration { names, values } => {
                for value in values {
                    self.check_expr(value)?;
                }
                let close_count =
                    names.iter().filter(|(_, a)| *a == LocalAttrib::Close).count();
                if close_count > 1 {
                    return Err(self.err(
                        line,
                        "multiple to-be-closed variables in local list".to_string(),
                    ));
                }
                for (name, attrib) in names {
                    self.declare_local(name, *attrib);
                }
                Ok(())
            }
            StatKind::Assignment { targets, values } => {
                for value in values {
                    self.check_expr(value)?;
                }
                for target in targets {
                    match target {
                        AssignTarget::Name { name, span } => {
                            if matches!(
                                self.lookup_attrib(name),
                                Some(LocalAttrib::Const) | Some(LocalAttrib::Close)
                            ) {
                                return Err(self.err(
                                    span.line,
                                    format!("attempt to assign to const variable '{}'", name),
                                ));
                            }
                        }
                        AssignTarget::Field { object, .. } => self.check_expr(object)?,
                        AssignTarget::Index { object, index, .. } => {
                            self.check_expr(object)?;
                            self.check_expr(index)?;
                        }
                    }
                }
                Ok(())
            }
            StatKind::If { cond, then_block, elseifs, else_block } => {
                self.check_expr(cond)?;
                self.check_block(then_block, &[])?;
                for (elseif_cond, elseif_block) in elseifs {
                    self.check_expr(elseif_cond)?;
                    self.check_block(elseif_block, &[])?;
                }
                if let Some(block) = else_block {
                    self.check_block(block, &[])?;
                }
                Ok(())
            }
            StatKind::While { cond, body } => {
                self.check_expr(cond)?;
                self.check_loop_body(body, &[])
            }
            StatKind::RepeatUntil { body, cond } => {
                // The until condition sees the body's locals.
                self.current_function().loop_depth += 1;
                self.push_scope(&[]);
                let result = self.check_stats(body).and_then(|_| self.check_expr(cond));
                let result = self.resolve_scope(result);
                self.current_function().loop_depth -= 1;
                result
            }
            StatKind::NumericFor { var, start, limit, step, body } => {
                self.check_expr(start)?;
                self.check_expr(limit)?;
                if let Some(step) = step {
                    self.check_expr(step)?;
                }
                self.check_loop_body(body, std::slice::from_ref(var))
            }
            StatKind::GenericFor { names, exprs, body } => {
                for expr in exprs {
                    self.check_expr(expr)?;
                }
                self.check_loop_body(body, names)
            }
            StatKind::FunctionDef { name_path, body, .. } => {
                if name_path.len() == 1
                    && matches!(
                        self.lookup_attrib(&name_path[0]),
                        Some(LocalAttrib::Const) | Some(LocalAttrib::Close)
                    )
                {
                    return Err(self.err(
                        line,
                        format!("attempt to assign to const variable '{}'", name_path[0]),
                    ));
                }
                self.check_function(&body.block, &body.params, body.is_vararg)
            }
            StatKind::LocalFunctionDef { name, body } => {
                // The name is visible inside the body (recursion).
                self.declare_local(name, LocalAttrib::None);
                self.check_function(&body.block, &body.params, body.is_vararg)
            }
            StatKind::Return { values } | StatKind::Yield { values } => {
                for value in values {
                    self.check_expr(value)?;
                }
                Ok(())
            }
            StatKind::Break => {
                if self.current_function().loop_depth == 0 {
                    return Err(self.err(line, "break outside a loop".to_string()));
                }
                Ok(())
            }
            StatKind::Goto { label } => {
                let n_locals =
                    self.scopes.last().map(|s| s.locals.len()).unwrap_or(0);
                self.scopes.last_mut().expect("scope pushed by caller").gotos.push(GotoInfo {
                    name: label.clone(),
                    n_locals,
                    line,
                });
                Ok(())
            }
            StatKind::Label { name } => {
                let scope = self.scopes.last_mut().expect("scope pushed by caller");
                if scope.labels.iter().any(|l| l.name == *name) {
                    return Err(LuaError::syntax(
                        self.chunk,
                        line,
                        format!("label '{}' already defined", name),
                    ));
                }
                let n_locals = scope.locals.len();
                scope.labels.push(LabelInfo { name: name.clone(), n_locals });
                Ok(())
            }
            StatKind::DoBlock { body } => self.check_block(body, &[]),
            StatKind::ExpressionStatement { expr } => self.check_expr(expr),
        }
    }

    fn check_loop_body(&mut self, body: &Block, pre_locals: &[String]) -> LuaResult<()> {
        self.current_function().loop_depth += 1;
        let result = self.check_block(body, pre_locals);
        self.current_function().loop_depth -= 1;
        result
    }

    fn check_expr(&mut self, expr: &Expr) -> LuaResult<()> {
        match &expr.kind {
            ExprKind::NilLiteral
            | ExprKind::BoolLiteral(_)
            | ExprKind::NumberLiteral(_)
            | ExprKind::StringLiteral { .. }
            | ExprKind::Identifier(_) => Ok(()),
            ExprKind::VarArg => {
                let vararg = self.functions.last().map(|f| f.is_vararg).unwrap_or(false);
                if !vararg {
                    return Err(self.err(
                        expr.span.line,
                        "cannot use '...' outside a vararg function".to_string(),
                    ));
                }
                Ok(())
            }
            ExprKind::BinaryOp { lhs, rhs, .. } => {
                self.check_expr(lhs)?;
                self.check_expr(rhs)
            }
            ExprKind::UnaryOp { operand, .. } => self.check_expr(operand),
            ExprKind::Grouped(inner) => self.check_expr(inner),
            ExprKind::FunctionCall { func, args } => {
                self.check_expr(func)?;
                for arg in args {
                    self.check_expr(arg)?;
                }
                Ok(())
            }
            ExprKind::MethodCall { object, args, .. } => {
                self.check_expr(object)?;
                for arg in args {
                    self.check_expr(arg)?;
                }
                Ok(())
            }
            ExprKind::TableFieldAccess { object, .. } => self.check_expr(object),
            ExprKind::TableIndexAccess { object, index } => {
                self.check_expr(object)?;
                self.check_expr(index)
            }
            ExprKind::TableConstructor { entries } => {
                for entry in entries {
                    match entry {
                        TableEntry::Keyed { value, .. } => self.check_expr(value)?,
                        TableEntry::Indexed { key, value } => {
                            self.check_expr(key)?;
                            self.check_expr(value)?;
                        }
                        TableEntry::Array(value) => self.check_expr(value)?,
                    }
                }
                Ok(())
            }
            ExprKind::FunctionLiteral(body) => {
                self.check_body(body)
            }
        }
    }

    fn check_body(&mut self, body: &FunctionBody) -> LuaResult<()> {
        self.check_function(&body.block, &body.params, body.is_vararg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check(source: &str) -> LuaResult<()> {
        let program = parse(source, "sem").unwrap();
        check_program(&program, "sem")
    }

    #[test]
    fn test_goto_into_local_scope() {
        let err = check("do goto L; local x = 1; ::L:: end").unwrap_err();
        assert!(err.message().contains("jumps into the scope of local 'x'"), "{}", err.message());
        // Backward jumps out of a local's scope are fine.
        assert!(check("do ::L:: local x = 1 goto L end").is_ok());
    }

    #[test]
    fn test_goto_without_label() {
        let err = check("goto nowhere").unwrap_err();
        assert!(err.message().contains("no visible label 'nowhere'"));
        // A label in an enclosing block is visible.
        assert!(check("do ::out:: do goto out end end").is_ok());
        // Labels never cross function boundaries.
        let err = check("do ::out:: local f = function() goto out end end").unwrap_err();
        assert!(err.message().contains("no visible label 'out'"));
    }

    #[test]
    fn test_duplicate_label() {
        let err = check("do ::a:: ::a:: end").unwrap_err();
        assert!(err.message().contains("label 'a' already defined"));
        // The same label in sibling blocks is fine.
        assert!(check("do ::a:: end do ::a:: end").is_ok());
    }

    #[test]
    fn test_const_assignment() {
        let err = check("local x <const> = 1 x = 2").unwrap_err();
        assert!(err.message().contains("attempt to assign to const variable 'x'"));
        // Close variables are constant too.
        let err = check("local x <close> = nil x = 2").unwrap_err();
        assert!(err.message().contains("const"));
        // Shadowing is allowed.
        assert!(check("local x <const> = 1 local x = 2 x = 3").is_ok());
    }

    #[test]
    fn test_const_upvalue_assignment() {
        let err = check("local x <const> = 1 local f = function() x = 2 end").unwrap_err();
        assert!(err.message().contains("const"));
    }

    #[test]
    fn test_multiple_close_rejected() {
        let err = check("local a <close>, b <close> = nil, nil").unwrap_err();
        assert!(err.message().contains("multiple to-be-closed"));
        assert!(check("local a <close>, b = nil, nil").is_ok());
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(check("break").is_err());
        assert!(check("while true do break end").is_ok());
        // A function body resets the loop context.
        assert!(check("while true do local f = function() break end end").is_err());
    }

    #[test]
    fn test_vararg_outside_vararg_function() {
        assert!(check("return ...").is_ok());
        assert!(check("local f = function() return ... end").is_err());
        assert!(check("local f = function(...) return ... end").is_ok());
    }
}
