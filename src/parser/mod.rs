//! Recursive-descent parser producing the `ast` module's tree.
//!
//! Statements live in `statement.rs`, expressions (with the Lua 5.4
//! operator-precedence table) in `expression.rs`.

pub mod expression;
pub mod statement;

use crate::ast::{Program, Span};
use crate::error_types::{LuaError, LuaResult};
use crate::lexer::{self, Tok, Token};

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    chunk: &'a str,
}

/// Parse a chunk into a `Program`.
pub fn parse(source: &str, chunk: &str) -> LuaResult<Program> {
    let tokens = lexer::tokenize(source, chunk)?;
    let mut parser = Parser::new(tokens, chunk);
    let block = parser.parse_block()?;
    parser.expect_eof()?;
    Ok(Program { block })
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, chunk: &'a str) -> Self {
        Parser { tokens, pos: 0, chunk }
    }

    pub(crate) fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    /// Token kind after the current one; lets the table-constructor and
    /// assignment paths disambiguate with one extra token.
    pub(crate) fn peek_ahead(&self) -> &Tok {
        let next = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[next].tok
    }

    pub(crate) fn span(&self) -> Span {
        let token = &self.tokens[self.pos];
        Span::new(token.line, token.column)
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn check(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    pub(crate) fn eat(&mut self, tok: &Tok) -> bool {
        if self.check(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, tok: Tok) -> LuaResult<()> {
        if self.check(&tok) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&tok.describe()))
        }
    }

    pub(crate) fn expect_name(&mut self) -> LuaResult<String> {
        match self.peek() {
            Tok::Name(_) => match self.advance().tok {
                Tok::Name(name) => Ok(name),
                _ => unreachable!(),
            },
            _ => Err(self.unexpected("<name>")),
        }
    }

    pub(crate) fn error_here(&self, message: impl Into<String>) -> LuaError {
        LuaError::syntax(self.chunk, self.tokens[self.pos].line, message)
    }

    pub(crate) fn unexpected(&self, expected: &str) -> LuaError {
        self.error_here(format!("'{}' expected near '{}'", expected, self.peek().describe()))
    }

    pub(crate) fn expect_eof(&self) -> LuaResult<()> {
        if self.check(&Tok::Eof) {
            Ok(())
        } else {
            Err(self.unexpected("<eof>"))
        }
    }

    /// Does the current token terminate a block?
    pub(crate) fn at_block_end(&self) -> bool {
        matches!(self.peek(), Tok::End | Tok::Else | Tok::Elseif | Tok::Until | Tok::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExprKind, StatKind};

    #[test]
    fn test_parse_simple_chunk() {
        let program = parse("local x = 1 return x", "p").unwrap();
        assert_eq!(program.block.stats.len(), 2);
        assert!(matches!(program.block.stats[0].kind, StatKind::LocalDeclaration { .. }));
        assert!(matches!(program.block.stats[1].kind, StatKind::Return { .. }));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(parse("return 1 x = 2", "p").is_err());
        assert!(parse("end", "p").is_err());
    }

    #[test]
    fn test_spans_track_lines() {
        let program = parse("local a = 1\nlocal b = 2", "p").unwrap();
        assert_eq!(program.block.stats[0].span.line, 1);
        assert_eq!(program.block.stats[1].span.line, 2);
    }

    #[test]
    fn test_field_vs_index_nodes_distinct() {
        let program = parse("return t.x, t['x']", "p").unwrap();
        match &program.block.stats[0].kind {
            StatKind::Return { values } => {
                assert!(matches!(values[0].kind, ExprKind::TableFieldAccess { .. }));
                assert!(matches!(values[1].kind, ExprKind::TableIndexAccess { .. }));
            }
            other => panic!("expected return, got {:?}", other),
        }
    }
}
