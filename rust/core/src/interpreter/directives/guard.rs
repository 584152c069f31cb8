//! `/guard @g [trigger] = when [ … ]`

use std::sync::Arc;

use mlld_ast::{GuardArm, GuardTrigger};

use crate::env::Environment;
use crate::error::MlldResult;
use crate::guards::{GuardOrigin, GuardRule};
use crate::value::Value;

/// Register a guard. Inside module evaluation the rule is collected for
/// registration at import application instead.
pub fn evaluate(
    name: &str,
    trigger: GuardTrigger,
    arms: &[GuardArm],
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let rule = GuardRule {
        name: name.to_string(),
        trigger,
        extra_ops: Vec::new(),
        arms: arms.to_vec(),
        origin: GuardOrigin::Local,
    };

    match env.guard_collector() {
        Some(collector) => collector
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(rule),
        None => env.guards().register(rule),
    }
    Ok(Value::Null)
}
