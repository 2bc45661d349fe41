//! Expression-level grammar with the Lua 5.4 precedence table.

use std::rc::Rc;

use crate::ast::{BinOp, Expr, ExprKind, Span, TableEntry, UnOp};
use crate::error_types::LuaResult;
use crate::lexer::Tok;
use crate::parser::Parser;

/// Binary operator priorities `(left, right)`; `..` and `^` are
/// right-associative (left > right).
fn binop_priority(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::Or => (1, 1),
        BinOp::And => (2, 2),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Ne | BinOp::Eq => (3, 3),
        BinOp::BOr => (4, 4),
        BinOp::BXor => (5, 5),
        BinOp::BAnd => (6, 6),
        BinOp::Shl | BinOp::Shr => (7, 7),
        BinOp::Concat => (9, 8),
        BinOp::Add | BinOp::Sub => (10, 10),
        BinOp::Mul | BinOp::Div | BinOp::IDiv | BinOp::Mod => (11, 11),
        BinOp::Pow => (14, 13),
    }
}

const UNARY_PRIORITY: u8 = 12;

fn binop_of(tok: &Tok) -> Option<BinOp> {
    Some(match tok {
        Tok::Plus => BinOp::Add,
        Tok::Minus => BinOp::Sub,
        Tok::Star => BinOp::Mul,
        Tok::Slash => BinOp::Div,
        Tok::DoubleSlash => BinOp::IDiv,
        Tok::Percent => BinOp::Mod,
        Tok::Caret => BinOp::Pow,
        Tok::DotDot => BinOp::Concat,
        Tok::Eq => BinOp::Eq,
        Tok::Ne => BinOp::Ne,
        Tok::Lt => BinOp::Lt,
        Tok::Le => BinOp::Le,
        Tok::Gt => BinOp::Gt,
        Tok::Ge => BinOp::Ge,
        Tok::And => BinOp::And,
        Tok::Or => BinOp::Or,
        Tok::Amp => BinOp::BAnd,
        Tok::Pipe => BinOp::BOr,
        Tok::Tilde => BinOp::BXor,
        Tok::Shl => BinOp::Shl,
        Tok::Shr => BinOp::Shr,
        _ => return None,
    })
}

fn unop_of(tok: &Tok) -> Option<UnOp> {
    Some(match tok {
        Tok::Minus => UnOp::Neg,
        Tok::Not => UnOp::Not,
        Tok::Hash => UnOp::Len,
        Tok::Tilde => UnOp::BNot,
        _ => return None,
    })
}

impl<'a> Parser<'a> {
    pub fn parse_expr(&mut self) -> LuaResult<Expr> {
        self.parse_sub_expr(0)
    }

    pub(crate) fn parse_expr_list(&mut self) -> LuaResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_expr()?];
        while self.eat(&Tok::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_sub_expr(&mut self, limit: u8) -> LuaResult<Expr> {
        let span = self.span();
        let mut left = if let Some(op) = unop_of(self.peek()) {
            self.advance();
            let operand = self.parse_sub_expr(UNARY_PRIORITY)?;
            Expr::new(ExprKind::UnaryOp { op, operand: Box::new(operand) }, span)
        } else {
            self.parse_simple_expr()?
        };
        while let Some(op) = binop_of(self.peek()) {
            let (left_priority, right_priority) = binop_priority(op);
            if left_priority <= limit {
                break;
            }
            let op_span = self.span();
            self.advance();
            let right = self.parse_sub_expr(right_priority)?;
            left = Expr::new(
                ExprKind::BinaryOp { op, lhs: Box::new(left), rhs: Box::new(right) },
                op_span,
            );
        }
        Ok(left)
    }

    fn parse_simple_expr(&mut self) -> LuaResult<Expr> {
        let span = self.span();
        match self.peek() {
            Tok::Nil => {
                self.advance();
                Ok(Expr::new(ExprKind::NilLiteral, span))
            }
            Tok::True => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLiteral(true), span))
            }
            Tok::False => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLiteral(false), span))
            }
            Tok::Number(_) => match self.advance().tok {
                Tok::Number(n) => Ok(Expr::new(ExprKind::NumberLiteral(n), span)),
                _ => unreachable!(),
            },
            Tok::Str { .. } => match self.advance().tok {
                Tok::Str { bytes, long } => {
                    Ok(Expr::new(ExprKind::StringLiteral { bytes, long }, span))
                }
                _ => unreachable!(),
            },
            Tok::Ellipsis => {
                self.advance();
                Ok(Expr::new(ExprKind::VarArg, span))
            }
            Tok::LBrace => self.parse_table_constructor(),
            Tok::Function => {
                self.advance();
                let body = self.parse_function_body(false, span)?;
                Ok(Expr::new(ExprKind::FunctionLiteral(Rc::new(body)), span))
            }
            _ => self.parse_suffixed_expr(),
        }
    }

    fn parse_primary_expr(&mut self) -> LuaResult<Expr> {
        let span = self.span();
        match self.peek() {
            Tok::Name(_) => {
                let name = self.expect_name()?;
                Ok(Expr::new(ExprKind::Identifier(name), span))
            }
            Tok::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(Tok::RParen)?;
                Ok(Expr::new(ExprKind::Grouped(Box::new(inner)), span))
            }
            _ => Err(self.error_here(format!(
                "unexpected symbol near '{}'",
                self.peek().describe()
            ))),
        }
    }

    /// `primary { '.' Name | '[' expr ']' | ':' Name args | args }`
    pub(crate) fn parse_suffixed_expr(&mut self) -> LuaResult<Expr> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            let span = self.span();
            match self.peek() {
                Tok::Dot => {
                    self.advance();
                    let field = self.expect_name()?;
                    expr = Expr::new(
                        ExprKind::TableFieldAccess { object: Box::new(expr), field },
                        span,
                    );
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(Tok::RBracket)?;
                    expr = Expr::new(
                        ExprKind::TableIndexAccess {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                Tok::Colon => {
                    self.advance();
                    let method = self.expect_name()?;
                    let args = self.parse_call_args()?;
                    expr = Expr::new(
                        ExprKind::MethodCall { object: Box::new(expr), method, args },
                        span,
                    );
                }
                Tok::LParen | Tok::Str { .. } | Tok::LBrace => {
                    let args = self.parse_call_args()?;
                    expr =
                        Expr::new(ExprKind::FunctionCall { func: Box::new(expr), args }, span);
                }
                _ => return Ok(expr),
            }
        }
    }

    /// `args ::= '(' [explist] ')' | String | tableconstructor`
    fn parse_call_args(&mut self) -> LuaResult<Vec<Expr>> {
        let span = self.span();
        match self.peek() {
            Tok::LParen => {
                self.advance();
                let args =
                    if self.check(&Tok::RParen) { Vec::new() } else { self.parse_expr_list()? };
                self.expect(Tok::RParen)?;
                Ok(args)
            }
            Tok::Str { .. } => match self.advance().tok {
                Tok::Str { bytes, long } => {
                    Ok(vec![Expr::new(ExprKind::StringLiteral { bytes, long }, span)])
                }
                _ => unreachable!(),
            },
            Tok::LBrace => Ok(vec![self.parse_table_constructor()?]),
            _ => Err(self.unexpected("function arguments")),
        }
    }

    fn parse_table_constructor(&mut self) -> LuaResult<Expr> {
        let span = self.span();
        self.expect(Tok::LBrace)?;
        let mut entries = Vec::new();
        while !self.check(&Tok::RBrace) {
            match self.peek() {
                Tok::LBracket => {
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect(Tok::RBracket)?;
                    self.expect(Tok::Assign)?;
                    let value = self.parse_expr()?;
                    entries.push(TableEntry::Indexed { key, value });
                }
                Tok::Name(_) if self.peek_ahead() == &Tok::Assign => {
                    let field = self.expect_name()?;
                    self.expect(Tok::Assign)?;
                    let value = self.parse_expr()?;
                    entries.push(TableEntry::Keyed { field, value });
                }
                _ => entries.push(TableEntry::Array(self.parse_expr()?)),
            }
            if !self.eat(&Tok::Comma) && !self.eat(&Tok::Semi) {
                break;
            }
        }
        self.expect(Tok::RBrace)?;
        Ok(Expr::new(ExprKind::TableConstructor { entries }, span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn expr_of(source: &str) -> Expr {
        let program = parse(&format!("return {}", source), "p").unwrap();
        match program.block.stats.into_iter().next().unwrap().kind {
            crate::ast::StatKind::Return { mut values } => values.remove(0),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        match expr_of("1 + 2 * 3").kind {
            ExprKind::BinaryOp { op: BinOp::Add, rhs, .. } => {
                assert!(matches!(rhs.kind, ExprKind::BinaryOp { op: BinOp::Mul, .. }));
            }
            other => panic!("expected add at root, got {:?}", other),
        }
    }

    #[test]
    fn test_concat_right_associative() {
        match expr_of("'a' .. 'b' .. 'c'").kind {
            ExprKind::BinaryOp { op: BinOp::Concat, rhs, lhs } => {
                assert!(matches!(lhs.kind, ExprKind::StringLiteral { .. }));
                assert!(matches!(rhs.kind, ExprKind::BinaryOp { op: BinOp::Concat, .. }));
            }
            other => panic!("expected concat at root, got {:?}", other),
        }
    }

    #[test]
    fn test_pow_binds_tighter_than_unary() {
        // -x^2 parses as -(x^2)
        match expr_of("-x^2").kind {
            ExprKind::UnaryOp { op: UnOp::Neg, operand } => {
                assert!(matches!(operand.kind, ExprKind::BinaryOp { op: BinOp::Pow, .. }));
            }
            other => panic!("expected unary minus at root, got {:?}", other),
        }
    }

    #[test]
    fn test_comparison_below_bitwise() {
        // `a | b == c` parses as `(a | b) == c`.
        match expr_of("a | b == c").kind {
            ExprKind::BinaryOp { op: BinOp::Eq, lhs, .. } => {
                assert!(matches!(lhs.kind, ExprKind::BinaryOp { op: BinOp::BOr, .. }));
            }
            other => panic!("expected == at root, got {:?}", other),
        }
    }

    #[test]
    fn test_call_argument_sugar() {
        assert!(matches!(expr_of("f'lit'").kind, ExprKind::FunctionCall { .. }));
        assert!(matches!(expr_of("f{1, 2}").kind, ExprKind::FunctionCall { .. }));
        assert!(matches!(expr_of("obj:method{}").kind, ExprKind::MethodCall { .. }));
    }

    #[test]
    fn test_table_constructor_entry_kinds() {
        match expr_of("{1, x = 2, [3] = 4, 5}").kind {
            ExprKind::TableConstructor { entries } => {
                assert!(matches!(entries[0], TableEntry::Array(_)));
                assert!(matches!(entries[1], TableEntry::Keyed { .. }));
                assert!(matches!(entries[2], TableEntry::Indexed { .. }));
                assert!(matches!(entries[3], TableEntry::Array(_)));
            }
            other => panic!("expected table constructor, got {:?}", other),
        }
    }

    #[test]
    fn test_grouped_call_is_wrapped() {
        assert!(matches!(expr_of("(f())").kind, ExprKind::Grouped(_)));
    }

    #[test]
    fn test_chained_suffixes() {
        let e = expr_of("a.b[1]:m(2).c");
        assert!(matches!(e.kind, ExprKind::TableFieldAccess { .. }));
    }
}
