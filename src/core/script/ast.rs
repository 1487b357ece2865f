//! Expression AST produced by the Pratt parser.

use std::rc::Rc;

use super::value::SourceSpan;

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

impl Expr {
    pub fn new(kind: ExprKind, span: SourceSpan) -> Self {
        Self { kind, span }
    }

    /// Whether this expression is an assignment (plain, compound or update).
    /// The unnamed macro does not print the value of assignments.
    pub fn is_assignment(&self) -> bool {
        matches!(self.kind, ExprKind::Assign { .. } | ExprKind::Update { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    BitNot,
    Typeof,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Exp,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    BitAnd,
    BitOr,
    BitXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// `=` is `Assign { op: None }`; `+=` is `Assign { op: Some(Arith(Add)) }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    Arith(BinaryOp),
    Logical(LogicalOp),
}

#[derive(Debug, Clone)]
pub enum TemplateSegment {
    Str(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum PropertyKey {
    Named(String),
    Computed(Expr),
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Template(Vec<TemplateSegment>),
    Regex {
        source: String,
        flags: String,
    },
    Array(Vec<Expr>),
    Object(Vec<(PropertyKey, Expr)>),
    /// `...expr` inside array literals and call arguments.
    Spread(Box<Expr>),
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `++x`, `x--`, ...
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        op: Option<CompoundOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Arrow {
        params: Vec<String>,
        body: Rc<Expr>,
    },
}
