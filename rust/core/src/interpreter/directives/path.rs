//! `/path @p = "<string>"`

use std::sync::Arc;

use mlld_ast::Directive;

use crate::env::Environment;
use crate::error::MlldResult;
use crate::security_manager::normalize_path;
use crate::value::Value;
use crate::variable::{Variable, VariableSource};

/// Bind a normalized path value.
pub fn evaluate(
    directive: &Directive,
    name: &str,
    value: &str,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let normalized = normalize_path(std::path::Path::new(value))
        .to_string_lossy()
        .to_string();
    let path_value = Value::Path(normalized);

    env.set(
        Variable::new(name, path_value.clone())
            .with_source(VariableSource::directive("path"))
            .with_definition(directive.location.clone())
            .with_security(env.security_snapshot()),
    );
    Ok(path_value)
}
