//! Reference resolution: `@name` and `@name.a.b.0` under the five
//! resolution contexts.
//!
//! The context controls structured-value unwrapping, how primitives are
//! preserved, and what a missing name produces:
//!
//! | Context       | Unwrap      | Missing name          |
//! |---------------|-------------|-----------------------|
//! | Display       | text view   | empty string          |
//! | FieldAccess   | data view   | error (strict) / null |
//! | Equality      | raw         | undefined (≠ anything)|
//! | PipelineInput | raw         | pass through          |
//! | Interpolation | text view   | empty string          |

use mlld_ast::{FieldSeg, VarRef};

use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::value::{EvalValue, Value};

/// The context a reference is resolved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionContext {
    /// Templates and `/show`.
    Display,
    /// Dotted access and structured traversal.
    FieldAccess,
    /// `==` / `!=` comparisons.
    Equality,
    /// The value entering a pipeline stage.
    PipelineInput,
    /// Shell command interpolation.
    Interpolation,
}

impl ResolutionContext {
    fn stringifies(self) -> bool {
        matches!(self, Self::Display | Self::Interpolation)
    }
}

/// Resolve a reference, returning `None` when the name is missing and the
/// context treats that as "undefined" rather than an error or default.
pub fn resolve_ref_opt(
    env: &Environment,
    var_ref: &VarRef,
    rcx: ResolutionContext,
) -> MlldResult<Option<EvalValue>> {
    let Some(variable) = env.get(&var_ref.name) else {
        return match rcx {
            ResolutionContext::Display | ResolutionContext::Interpolation => {
                Ok(Some(EvalValue::new(Value::text(""))))
            }
            ResolutionContext::FieldAccess => {
                if env.config().strict_fields {
                    Err(MlldError::new(ErrorKind::UnknownVariable {
                        name: var_ref.name.clone(),
                    }))
                } else {
                    Ok(Some(EvalValue::new(Value::Null)))
                }
            }
            ResolutionContext::Equality | ResolutionContext::PipelineInput => Ok(None),
        };
    };

    let mut current = variable.value.clone();
    if !var_ref.fields.is_empty() {
        // Field access always traverses the data view.
        for seg in &var_ref.fields {
            current = access_field(
                &current,
                seg,
                env.config().strict_fields,
                &var_ref.name,
            )?;
        }
    }

    let value = if rcx.stringifies() {
        Value::text(current.to_text())
    } else {
        current
    };

    Ok(Some(EvalValue::with_security(
        value,
        variable.security.clone(),
    )))
}

/// Resolve a reference, mapping "undefined" to `Null`.
pub fn resolve_ref(
    env: &Environment,
    var_ref: &VarRef,
    rcx: ResolutionContext,
) -> MlldResult<EvalValue> {
    Ok(resolve_ref_opt(env, var_ref, rcx)?.unwrap_or_else(|| EvalValue::new(Value::Null)))
}

/// Traverse one field segment. Objects traverse by key, arrays by numeric
/// index; structured values unwrap to their data view first.
pub fn access_field(
    value: &Value,
    seg: &FieldSeg,
    strict: bool,
    base_name: &str,
) -> MlldResult<Value> {
    let value = match value.unwrap_imported() {
        Value::Structured(sv) => Value::from_json(sv.data.clone()),
        other => other.clone(),
    };

    let missing = |path: String| -> MlldResult<Value> {
        if strict {
            Err(MlldError::new(ErrorKind::FieldNotFound { path }))
        } else {
            Ok(Value::Null)
        }
    };

    match (&value, seg) {
        (Value::Object(map), FieldSeg::Key(key)) => match map.get(key) {
            Some(inner) => Ok(inner.clone()),
            None => missing(format!("@{base_name}.{key}")),
        },
        (Value::Array(items), FieldSeg::Index(index)) => {
            let idx = usize::try_from(*index).ok();
            match idx.and_then(|i| items.get(i)) {
                Some(inner) => Ok(inner.clone()),
                None => missing(format!("@{base_name}.{index}")),
            }
        }
        // Numeric keys address arrays too: `@xs.0` parses as a key when
        // the grammar cannot tell; retry as an index.
        (Value::Array(items), FieldSeg::Key(key)) => match key
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
        {
            Some(inner) => Ok(inner.clone()),
            None => missing(format!("@{base_name}.{key}")),
        },
        (_, FieldSeg::Key(key)) => missing(format!("@{base_name}.{key}")),
        (_, FieldSeg::Index(index)) => missing(format!("@{base_name}.{index}")),
    }
}
