//! The parsed document tree consumed by the mlld evaluation core.
//!
//! The surface grammar lives in a separate collaborator; this crate defines
//! the shapes it produces. Every type round-trips through serde so a host
//! can hand the core a JSON document instead of linking the parser.

pub mod directive;
pub mod document;
pub mod expr;
pub mod location;
pub mod pipeline;

pub use directive::{
    CacheDuration, Directive, DirectiveKind, ExeBody, ForBody, GuardAction, GuardArm, GuardCond,
    GuardTrigger, GuardTiming, ImportClause, ImportItem, ImportType, Lang, OpKind, ParallelSpec,
    RunSpec, WhenAction, WhenArm,
};
pub use document::{Document, Node};
pub use expr::{
    BinaryOp, CallExpr, Expr, FieldSeg, ForExpr, Literal, Template, TemplatePart, TemplateSyntax,
    UnaryOp, VarRef,
};
pub use location::Location;
pub use pipeline::{BuiltinEffect, FormatHint, PipelineExpr, StageSpec};
