//! `/when <cond> [first] [ … => … ]`

use std::sync::Arc;

use mlld_ast::{WhenAction, WhenArm};

use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::value::Value;

/// Evaluate conditional arms. Without `first`, every matching arm runs;
/// with `first`, evaluation stops after the first match. A `retry` action
/// is only legal when the surrounding executable runs as a pipeline
/// stage, which is handled by the executable-body path — reaching one
/// here is an error.
pub async fn evaluate(
    arms: &[WhenArm],
    first: bool,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let mut result = Value::Null;

    for arm in arms {
        let cond = super::super::expr::evaluate_expr(&arm.cond, env).await?;
        if !cond.value.is_truthy() {
            continue;
        }
        match &arm.action {
            WhenAction::Retry => {
                return Err(MlldError::new(ErrorKind::InvalidRetry {
                    reason: "retry is only legal inside pipeline stages".into(),
                }));
            }
            WhenAction::Expr { expr } => {
                result = super::super::expr::evaluate_expr(expr, env).await?.value;
            }
            WhenAction::Directive { directive } => {
                super::super::router::evaluate_directive(directive, env).await?;
            }
        }
        if first {
            break;
        }
    }

    Ok(result)
}
