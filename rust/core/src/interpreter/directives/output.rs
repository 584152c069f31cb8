//! `/output <expr> to "path"`

use std::sync::Arc;

use mlld_ast::{Expr, GuardTiming, OpKind};

use crate::effects::Effect;
use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::guards::GuardVerdict;
use crate::security_manager::PathMode;
use crate::value::Value;

/// Write a value to a file. The path passes through the security manager
/// before any effect is emitted.
pub async fn evaluate(
    value: &Expr,
    target: &str,
    append: bool,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let evaluated = super::super::expr::evaluate_expr(value, env).await?;

    let mut mx = evaluated.security.clone();
    mx.merge(&env.security_snapshot());
    if let GuardVerdict::Deny { guard, reason } =
        env.guards().check(GuardTiming::Before, OpKind::Output, &mx)
    {
        return Err(MlldError::new(ErrorKind::GuardDenied { guard, reason }));
    }

    let path = env
        .security_manager()
        .check_path(std::path::Path::new(target), PathMode::Write)?;

    env.sink().emit(Effect::File {
        path,
        append,
        contents: evaluated.value.to_text(),
    })?;
    Ok(Value::Null)
}
