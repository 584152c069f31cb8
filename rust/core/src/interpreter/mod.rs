//! The directive interpreter.
//!
//! [`evaluate_document`] walks a parsed document node by node: prose is
//! emitted verbatim, directives are routed through [`router`] to their
//! kind-specific evaluators. Evaluators enrich errors with the directive
//! trace and rethrow; nothing is swallowed here.

pub mod call;
pub mod directives;
pub mod expr;
pub mod router;
pub mod template;

use std::sync::Arc;

use mlld_ast::{Directive, Document, Node};

use crate::effects::Effect;
use crate::env::Environment;
use crate::error::MlldResult;
use crate::value::Value;

pub use call::{ExecOutcome, StageContext};
pub use expr::evaluate_expr;
pub use router::evaluate_directive;
pub use template::interpolate;

/// The decision a pre-hook returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Continue,
    Abort(String),
}

/// Observes directive evaluation. Pre-hooks may abort; retry is not
/// supported at this layer.
pub trait DirectiveHook: Send + Sync {
    /// Runs before the directive's evaluator.
    fn before(&self, _directive: &Directive, _env: &Environment) -> HookDecision {
        HookDecision::Continue
    }

    /// Runs after the evaluator succeeds.
    fn after(&self, _directive: &Directive, _env: &Environment, _value: &Value) {}
}

/// The result of evaluating a document.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    /// The rendered document assembled by the effect sink.
    pub document: String,
    /// The value of the last value-producing directive, if any.
    pub value: Option<Value>,
}

/// Evaluate a document in the given environment.
///
/// # Errors
///
/// Propagates the first directive error, enriched with location and
/// directive trace.
pub async fn evaluate_document(
    document: &Document,
    env: &Arc<Environment>,
) -> MlldResult<EvalOutcome> {
    let mut last_value = None;

    for node in &document.nodes {
        match node {
            Node::Prose { text } => {
                env.sink().emit(Effect::Doc(text.clone()))?;
            }
            Node::Directive(directive) => {
                let value = evaluate_directive(directive, env).await?;
                if !matches!(value, Value::Null) {
                    last_value = Some(value);
                }
            }
        }
    }

    Ok(EvalOutcome {
        document: env.sink().document(),
        value: last_value,
    })
}
