//! Statement-level grammar.

use std::rc::Rc;

use crate::ast::{
    AssignTarget, Block, Expr, ExprKind, FunctionBody, LocalAttrib, Span, Stat, StatKind,
};
use crate::error_types::LuaResult;
use crate::lexer::Tok;
use crate::parser::Parser;

impl<'a> Parser<'a> {
    /// `block ::= {stat} [retstat]`
    pub fn parse_block(&mut self) -> LuaResult<Block> {
        let mut stats = Vec::new();
        while !self.at_block_end() {
            if self.eat(&Tok::Semi) {
                continue;
            }
            if self.check(&Tok::Return) {
                stats.push(self.parse_return()?);
                break;
            }
            stats.push(self.parse_statement()?);
        }
        Ok(Block { stats })
    }

    fn parse_return(&mut self) -> LuaResult<Stat> {
        let span = self.span();
        self.expect(Tok::Return)?;
        let values = if self.at_block_end() || self.check(&Tok::Semi) {
            Vec::new()
        } else {
            self.parse_expr_list()?
        };
        self.eat(&Tok::Semi);
        Ok(Stat::new(StatKind::Return { values }, span))
    }

    fn parse_statement(&mut self) -> LuaResult<Stat> {
        let span = self.span();
        match self.peek() {
            Tok::If => self.parse_if(span),
            Tok::While => self.parse_while(span),
            Tok::Do => {
                self.advance();
                let body = self.parse_block()?;
                self.expect(Tok::End)?;
                Ok(Stat::new(StatKind::DoBlock { body }, span))
            }
            Tok::For => self.parse_for(span),
            Tok::Repeat => self.parse_repeat(span),
            Tok::Function => self.parse_function_stat(span),
            Tok::Local => self.parse_local(span),
            Tok::DoubleColon => {
                self.advance();
                let name = self.expect_name()?;
                self.expect(Tok::DoubleColon)?;
                Ok(Stat::new(StatKind::Label { name }, span))
            }
            Tok::Break => {
                self.advance();
                Ok(Stat::new(StatKind::Break, span))
            }
            Tok::Goto => {
                self.advance();
                let label = self.expect_name()?;
                Ok(Stat::new(StatKind::Goto { label }, span))
            }
            _ => self.parse_expr_statement(span),
        }
    }

    fn parse_if(&mut self, span: Span) -> LuaResult<Stat> {
        self.expect(Tok::If)?;
        let cond = self.parse_expr()?;
        self.expect(Tok::Then)?;
        let then_block = self.parse_block()?;
        let mut elseifs = Vec::new();
        while self.eat(&Tok::Elseif) {
            let elseif_cond = self.parse_expr()?;
            self.expect(Tok::Then)?;
            elseifs.push((elseif_cond, self.parse_block()?));
        }
        let else_block = if self.eat(&Tok::Else) { Some(self.parse_block()?) } else { None };
        self.expect(Tok::End)?;
        Ok(Stat::new(StatKind::If { cond, then_block, elseifs, else_block }, span))
    }

    fn parse_while(&mut self, span: Span) -> LuaResult<Stat> {
        self.expect(Tok::While)?;
        let cond = self.parse_expr()?;
        self.expect(Tok::Do)?;
        let body = self.parse_block()?;
        self.expect(Tok::End)?;
        Ok(Stat::new(StatKind::While { cond, body }, span))
    }

    fn parse_repeat(&mut self, span: Span) -> LuaResult<Stat> {
        self.expect(Tok::Repeat)?;
        let body = self.parse_block()?;
        self.expect(Tok::Until)?;
        let cond = self.parse_expr()?;
        Ok(Stat::new(StatKind::RepeatUntil { body, cond }, span))
    }

    fn parse_for(&mut self, span: Span) -> LuaResult<Stat> {
        self.expect(Tok::For)?;
        let first = self.expect_name()?;
        if self.eat(&Tok::Assign) {
            let start = self.parse_expr()?;
            self.expect(Tok::Comma)?;
            let limit = self.parse_expr()?;
            let step = if self.eat(&Tok::Comma) { Some(self.parse_expr()?) } else { None };
            self.expect(Tok::Do)?;
            let body = self.parse_block()?;
            self.expect(Tok::End)?;
            return Ok(Stat::new(
                StatKind::NumericFor { var: first, start, limit, step, body },
                span,
            ));
        }
        let mut names = vec![first];
        while self.eat(&Tok::Comma) {
            names.push(self.expect_name()?);
        }
        self.expect(Tok::In)?;
        let exprs = self.parse_expr_list()?;
        self.expect(Tok::Do)?;
        let body = self.parse_block()?;
        self.expect(Tok::End)?;
        Ok(Stat::new(StatKind::GenericFor { names, exprs, body }, span))
    }

    /// `function Name{'.' Name}[':' Name] funcbody`
    fn parse_function_stat(&mut self, span: Span) -> LuaResult<Stat> {
        self.expect(Tok::Function)?;
        let mut name_path = vec![self.expect_name()?];
        while self.eat(&Tok::Dot) {
            name_path.push(self.expect_name()?);
        }
        let is_method = self.eat(&Tok::Colon);
        if is_method {
            name_path.push(self.expect_name()?);
        }
        let body = self.parse_function_body(is_method, span)?;
        Ok(Stat::new(StatKind::FunctionDef { name_path, is_method, body: Rc::new(body) }, span))
    }

    fn parse_local(&mut self, span: Span) -> LuaResult<Stat> {
        self.expect(Tok::Local)?;
        if self.eat(&Tok::Function) {
            let name = self.expect_name()?;
            let body = self.parse_function_body(false, span)?;
            return Ok(Stat::new(StatKind::LocalFunctionDef { name, body: Rc::new(body) }, span));
        }
        let mut names = vec![(self.expect_name()?, self.parse_attrib()?)];
        while self.eat(&Tok::Comma) {
            names.push((self.expect_name()?, self.parse_attrib()?));
        }
        let values = if self.eat(&Tok::Assign) { self.parse_expr_list()? } else { Vec::new() };
        Ok(Stat::new(StatKind::LocalDeclaration { names, values }, span))
    }

    fn parse_attrib(&mut self) -> LuaResult<LocalAttrib> {
        if !self.eat(&Tok::Lt) {
            return Ok(LocalAttrib::None);
        }
        let name = self.expect_name()?;
        self.expect(Tok::Gt)?;
        match name.as_str() {
            "const" => Ok(LocalAttrib::Const),
            "close" => Ok(LocalAttrib::Close),
            other => Err(self.error_here(format!("unknown attribute '{}'", other))),
        }
    }

    /// `funcbody ::= '(' [parlist] ')' block 'end'`; methods get an implicit
    /// leading `self` parameter.
    pub(crate) fn parse_function_body(
        &mut self,
        is_method: bool,
        span: Span,
    ) -> LuaResult<FunctionBody> {
        self.expect(Tok::LParen)?;
        let mut params = Vec::new();
        if is_method {
            params.push("self".to_string());
        }
        let mut is_vararg = false;
        if !self.check(&Tok::RParen) {
            loop {
                if self.eat(&Tok::Ellipsis) {
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen)?;
        let block = self.parse_block()?;
        self.expect(Tok::End)?;
        Ok(FunctionBody { params, is_vararg, block, span })
    }

    /// Expression statements: a call, or the start of a (multiple)
    /// assignment.
    fn parse_expr_statement(&mut self, span: Span) -> LuaResult<Stat> {
        let first = self.parse_suffixed_expr()?;
        if self.check(&Tok::Assign) || self.check(&Tok::Comma) {
            let mut targets = vec![self.into_target(first)?];
            while self.eat(&Tok::Comma) {
                let expr = self.parse_suffixed_expr()?;
                targets.push(self.into_target(expr)?);
            }
            self.expect(Tok::Assign)?;
            let values = self.parse_expr_list()?;
            return Ok(Stat::new(StatKind::Assignment { targets, values }, span));
        }
        if !matches!(first.kind, ExprKind::FunctionCall { .. } | ExprKind::MethodCall { .. }) {
            return Err(self.error_here("syntax error: expression cannot be used as a statement"));
        }
        Ok(Stat::new(StatKind::ExpressionStatement { expr: first }, span))
    }

    fn into_target(&self, expr: Expr) -> LuaResult<AssignTarget> {
        let span = expr.span;
        match expr.kind {
            ExprKind::Identifier(name) => Ok(AssignTarget::Name { name, span }),
            ExprKind::TableFieldAccess { object, field } => {
                Ok(AssignTarget::Field { object: *object, field, span })
            }
            ExprKind::TableIndexAccess { object, index } => {
                Ok(AssignTarget::Index { object: *object, index: *index, span })
            }
            _ => Err(self.error_here("cannot assign to this expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{LocalAttrib, StatKind};
    use crate::parser::parse;

    #[test]
    fn test_local_attribs() {
        let program = parse("local a <const>, b = 1, 2 local c <close> = nil", "p").unwrap();
        match &program.block.stats[0].kind {
            StatKind::LocalDeclaration { names, .. } => {
                assert_eq!(names[0], ("a".to_string(), LocalAttrib::Const));
                assert_eq!(names[1], ("b".to_string(), LocalAttrib::None));
            }
            other => panic!("expected local declaration, got {:?}", other),
        }
        match &program.block.stats[1].kind {
            StatKind::LocalDeclaration { names, .. } => {
                assert_eq!(names[0], ("c".to_string(), LocalAttrib::Close));
            }
            other => panic!("expected local declaration, got {:?}", other),
        }
        assert!(parse("local a <weird> = 1", "p").is_err());
    }

    #[test]
    fn test_method_gets_self() {
        let program = parse("function t:m(a) return self end", "p").unwrap();
        match &program.block.stats[0].kind {
            StatKind::FunctionDef { name_path, is_method, body } => {
                assert_eq!(name_path, &vec!["t".to_string(), "m".to_string()]);
                assert!(*is_method);
                assert_eq!(body.params, vec!["self".to_string(), "a".to_string()]);
            }
            other => panic!("expected function definition, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_forms() {
        assert!(parse("a, t.b, t[1] = 1, 2, 3", "p").is_ok());
        assert!(parse("a + 1 = 2", "p").is_err());
        assert!(parse("f() = 2", "p").is_err());
    }

    #[test]
    fn test_bare_expression_statement_rejected() {
        assert!(parse("1 + 1", "p").is_err());
        assert!(parse("f()", "p").is_ok());
        assert!(parse("t:m()", "p").is_ok());
    }

    #[test]
    fn test_numeric_and_generic_for() {
        assert!(parse("for i = 1, 10, 2 do end", "p").is_ok());
        assert!(parse("for k, v in pairs(t) do end", "p").is_ok());
        assert!(parse("for do end", "p").is_err());
    }

    #[test]
    fn test_goto_and_labels() {
        let program = parse("::top:: goto top", "p").unwrap();
        assert!(matches!(program.block.stats[0].kind, StatKind::Label { .. }));
        assert!(matches!(program.block.stats[1].kind, StatKind::Goto { .. }));
    }
}
