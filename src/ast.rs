//! Abstract syntax tree produced by the parser and consumed by the
//! evaluator.
//!
//! Field access (`t.x`) and index access (`t[x]`) stay distinct node kinds;
//! the distinction matters for metamethod and `_ENV` handling. All nodes
//! serialize with serde so closures can be dumped and reloaded as binary
//! chunks.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Source position of a node inside its chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Span { line, column }
    }
}

/// Numeric literal, tagged with its subtype. Literals beyond i64 keep their
/// exact digits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Numeral {
    Int(i64),
    Float(f64),
    Big(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    Len,
    BNot,
}

/// Attribute on a local declaration: `<const>` or `<close>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalAttrib {
    None,
    Const,
    Close,
}

/// Entries of a table constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableEntry {
    /// `name = value`
    Keyed { field: String, value: Expr },
    /// `[key] = value`
    Indexed { key: Expr, value: Expr },
    /// positional `value`
    Array(Expr),
}

/// An expression with its source span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr { kind, span }
    }

    /// Whether this expression can produce multiple values (function call,
    /// method call, or `...`). Grouping strips that ability.
    pub fn is_multivalue(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::FunctionCall { .. } | ExprKind::MethodCall { .. } | ExprKind::VarArg
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    NilLiteral,
    BoolLiteral(bool),
    NumberLiteral(Numeral),
    StringLiteral { bytes: Vec<u8>, long: bool },
    VarArg,
    Identifier(String),
    BinaryOp { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    UnaryOp { op: UnOp, operand: Box<Expr> },
    /// Parenthesized expression; always adjusts to exactly one value.
    Grouped(Box<Expr>),
    FunctionCall { func: Box<Expr>, args: Vec<Expr> },
    MethodCall { object: Box<Expr>, method: String, args: Vec<Expr> },
    /// `t.field`
    TableFieldAccess { object: Box<Expr>, field: String },
    /// `t[index]`
    TableIndexAccess { object: Box<Expr>, index: Box<Expr> },
    TableConstructor { entries: Vec<TableEntry> },
    FunctionLiteral(Rc<FunctionBody>),
}

/// Assignment targets of a (possibly multiple) assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    Name { name: String, span: Span },
    Field { object: Expr, field: String, span: Span },
    Index { object: Expr, index: Expr, span: Span },
}

/// A statement with its source span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub kind: StatKind,
    pub span: Span,
}

impl Stat {
    pub fn new(kind: StatKind, span: Span) -> Self {
        Stat { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatKind {
    Assignment { targets: Vec<AssignTarget>, values: Vec<Expr> },
    LocalDeclaration { names: Vec<(String, LocalAttrib)>, values: Vec<Expr> },
    If { cond: Expr, then_block: Block, elseifs: Vec<(Expr, Block)>, else_block: Option<Block> },
    While { cond: Expr, body: Block },
    RepeatUntil { body: Block, cond: Expr },
    NumericFor { var: String, start: Expr, limit: Expr, step: Option<Expr>, body: Block },
    GenericFor { names: Vec<String>, exprs: Vec<Expr>, body: Block },
    FunctionDef { name_path: Vec<String>, is_method: bool, body: Rc<FunctionBody> },
    LocalFunctionDef { name: String, body: Rc<FunctionBody> },
    Return { values: Vec<Expr> },
    /// Yield statement node from the chunk contract; surface syntax reaches
    /// yielding through `coroutine.yield` instead.
    Yield { values: Vec<Expr> },
    Break,
    Goto { label: String },
    Label { name: String },
    DoBlock { body: Block },
    ExpressionStatement { expr: Expr },
}

/// A sequence of statements sharing one scope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub stats: Vec<Stat>,
}

impl Block {
    /// Statement index of `::label::` in this block, if present.
    pub fn label_position(&self, label: &str) -> Option<usize> {
        self.stats.iter().position(|s| matches!(&s.kind, StatKind::Label { name } if name == label))
    }
}

/// A function's compiled shape: parameters, vararg flag, body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionBody {
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub block: Block,
    pub span: Span,
}

/// A parsed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub block: Block,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_position() {
        let block = Block {
            stats: vec![
                Stat::new(StatKind::Break, Span::new(1, 1)),
                Stat::new(StatKind::Label { name: "top".into() }, Span::new(2, 1)),
            ],
        };
        assert_eq!(block.label_position("top"), Some(1));
        assert_eq!(block.label_position("missing"), None);
    }

    #[test]
    fn test_multivalue_expressions() {
        let call = Expr::new(
            ExprKind::FunctionCall {
                func: Box::new(Expr::new(ExprKind::Identifier("f".into()), Span::default())),
                args: vec![],
            },
            Span::default(),
        );
        assert!(call.is_multivalue());
        let grouped = Expr::new(ExprKind::Grouped(Box::new(call)), Span::default());
        assert!(!grouped.is_multivalue());
    }

    #[test]
    fn test_ast_serde_round_trip() {
        let body = FunctionBody {
            params: vec!["x".into()],
            is_vararg: false,
            block: Block {
                stats: vec![Stat::new(
                    StatKind::Return {
                        values: vec![Expr::new(
                            ExprKind::NumberLiteral(Numeral::Int(1)),
                            Span::new(1, 8),
                        )],
                    },
                    Span::new(1, 1),
                )],
            },
            span: Span::new(1, 1),
        };
        let json = serde_json::to_string(&body).unwrap();
        let back: FunctionBody = serde_json::from_str(&json).unwrap();
        assert_eq!(body, back);
    }
}
