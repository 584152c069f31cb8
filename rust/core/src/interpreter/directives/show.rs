//! `/show <expr>`

use std::sync::Arc;

use mlld_ast::Expr;

use crate::effects::Effect;
use crate::env::Environment;
use crate::error::MlldResult;
use crate::value::Value;

/// Emit a value to the document and the console.
pub async fn evaluate(value: &Expr, env: &Arc<Environment>) -> MlldResult<Value> {
    let evaluated = super::super::expr::evaluate_expr(value, env).await?;
    let text = evaluated.value.to_text();
    env.sink().emit(Effect::Both(format!("{text}\n")))?;
    Ok(Value::Null)
}
