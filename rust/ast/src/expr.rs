//! Right-hand-side expressions: literals, references, templates, calls,
//! arithmetic, pipelines, and iteration forms.

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineExpr;

/// A literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Literal {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
}

/// One segment of a field-access path: object key or array index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSeg {
    Key(String),
    Index(i64),
}

/// A variable reference `@name` with an optional field path `@name.a.b.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSeg>,
}

impl VarRef {
    #[must_use]
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_fields(name: impl Into<String>, fields: Vec<FieldSeg>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}

/// Which template delimiter form the source used.
///
/// `::…::` interpolates `@var`; `:::…:::` interpolates `{{var}}`. The two
/// forms evaluate identically; the parser has already split interpolation
/// points, so evaluation only needs the syntax tag for metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplateSyntax {
    AtSign,
    DoubleBrace,
}

/// One piece of a template body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum TemplatePart {
    Text(String),
    Interp(VarRef),
}

/// A template body: alternating literal text and interpolation points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub parts: Vec<TemplatePart>,
    pub syntax: TemplateSyntax,
}

impl Template {
    /// A template consisting of a single literal text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TemplatePart::Text(text.into())],
            syntax: TemplateSyntax::AtSign,
        }
    }
}

/// An executable invocation `@fn(arg, …)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Expr>,
}

/// Binary operators available in `/var` right-hand sides and `/when`
/// conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnaryOp {
    Not,
    Neg,
}

/// The collection form of iteration: `for @x in @c => expr` evaluated for
/// its per-iteration values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForExpr {
    pub binding: String,
    pub source: Box<Expr>,
    pub body: Box<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<crate::directive::ParallelSpec>,
}

/// An expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "camelCase")]
pub enum Expr {
    Literal(Literal),
    Array { items: Vec<Expr> },
    Object { entries: Vec<(String, Expr)> },
    Ref(VarRef),
    Template(Template),
    /// Loader form `<path>`; the path may contain glob metacharacters.
    Load { path: String },
    Call(CallExpr),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Pipeline(Box<PipelineExpr>),
    /// Cartesian iteration `foreach @fn(@a, @b)`.
    Foreach { call: CallExpr },
    For(ForExpr),
}

impl Expr {
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::Literal(Literal::String(s.into()))
    }

    #[must_use]
    pub fn number(n: f64) -> Self {
        Self::Literal(Literal::Number(n))
    }

    #[must_use]
    pub fn bool(b: bool) -> Self {
        Self::Literal(Literal::Bool(b))
    }

    #[must_use]
    pub fn null() -> Self {
        Self::Literal(Literal::Null)
    }

    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Ref(VarRef::bare(name))
    }
}
