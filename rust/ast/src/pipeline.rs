//! Pipeline stage specifications.
//!
//! The surface syntax `a | s1 | s2` and the explicit
//! `a with { pipeline: [s1, s2] }` form both parse to a [`PipelineExpr`].

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// A builtin effect stage: emits the current value without transforming it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "camelCase")]
pub enum BuiltinEffect {
    /// Emit to the document and the console.
    Show,
    /// Emit to stderr only.
    Log,
    /// Write the value to a file.
    Output { path: String },
}

/// A format hint framing stage input for lazy parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatHint {
    Json,
    Csv,
    Xml,
    Text,
}

impl FormatHint {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Xml => "xml",
            Self::Text => "text",
        }
    }
}

/// One raw stage in a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "camelCase")]
pub enum StageSpec {
    /// A function-reference stage `| @fn` or `| @fn(extra)`.
    Call {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Expr>,
    },
    /// A builtin effect stage `| show`, `| log`, `| output "path"`.
    Builtin(BuiltinEffect),
    /// A parallel group `A || B || C` — one logical stage.
    Group { branches: Vec<StageSpec> },
}

/// A source expression with a chain of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExpr {
    pub source: Expr,
    pub stages: Vec<StageSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatHint>,
}
