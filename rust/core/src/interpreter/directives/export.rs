//! `/export { @a, @b }`

use std::sync::Arc;

use crate::env::Environment;
use crate::error::MlldResult;
use crate::value::Value;

/// Extend the module's export manifest.
pub fn evaluate(names: &[String], env: &Arc<Environment>) -> MlldResult<Value> {
    env.add_exports(names);
    Ok(Value::Null)
}
