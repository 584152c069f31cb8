//! Expression evaluation.
//!
//! Evaluation threads a security descriptor alongside each value: a
//! derived value's descriptor is always a superset of the union of its
//! inputs' descriptors.

use std::sync::Arc;

use async_recursion::async_recursion;
use indexmap::IndexMap;

use mlld_ast::{BinaryOp, Expr, Literal, UnaryOp};

use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::loader::is_glob;
use crate::resolve::{resolve_ref, resolve_ref_opt, ResolutionContext};
use crate::security::{taint, SecurityDescriptor};
use crate::security_manager::PathMode;
use crate::value::{EvalValue, StructuredValue, Value};

use super::call::{call_by_name, ExecOutcome};
use super::template::interpolate_tracked;

/// Evaluate an expression to a value plus accumulated security.
///
/// # Errors
///
/// Resolution, execution, and security errors propagate unenriched; the
/// router attaches trace and location.
#[async_recursion]
pub async fn evaluate_expr(expr: &Expr, env: &Arc<Environment>) -> MlldResult<EvalValue> {
    match expr {
        Expr::Literal(literal) => Ok(EvalValue::new(literal_value(literal))),

        Expr::Array { items } => {
            let mut values = Vec::with_capacity(items.len());
            let mut security = SecurityDescriptor::default();
            for item in items {
                let evaluated = evaluate_expr(item, env).await?;
                security.merge(&evaluated.security);
                values.push(evaluated.value);
            }
            Ok(EvalValue::with_security(Value::Array(values), security))
        }

        Expr::Object { entries } => {
            let mut map = IndexMap::new();
            let mut security = SecurityDescriptor::default();
            for (key, value_expr) in entries {
                let evaluated = evaluate_expr(value_expr, env).await?;
                security.merge(&evaluated.security);
                map.insert(key.clone(), evaluated.value);
            }
            Ok(EvalValue::with_security(Value::Object(map), security))
        }

        Expr::Ref(var_ref) => resolve_ref(env, var_ref, ResolutionContext::FieldAccess),

        Expr::Template(template) => {
            let (text, security) =
                interpolate_tracked(template, env, ResolutionContext::Display)?;
            Ok(EvalValue::with_security(Value::Text(text), security))
        }

        Expr::Load { path } => load_content(path, env).await,

        Expr::Call(call) => {
            let mut args = Vec::with_capacity(call.args.len());
            for arg in &call.args {
                args.push(evaluate_expr(arg, env).await?);
            }
            match call_by_name(&call.target, args, env, None).await? {
                ExecOutcome::Value(value) => Ok(value),
                ExecOutcome::Retry => Err(MlldError::new(ErrorKind::InvalidRetry {
                    reason: "retry is only legal inside pipeline stages".into(),
                })),
            }
        }

        Expr::Unary { op, operand } => {
            let evaluated = evaluate_expr(operand, env).await?;
            let value = match op {
                UnaryOp::Not => Value::Bool(!evaluated.value.is_truthy()),
                UnaryOp::Neg => Value::Number(-as_number(&evaluated.value)),
            };
            Ok(EvalValue::with_security(value, evaluated.security))
        }

        Expr::Binary { op, lhs, rhs } => evaluate_binary(*op, lhs, rhs, env).await,

        Expr::Pipeline(pipeline) => crate::pipeline::run_pipeline(pipeline, env).await,

        Expr::Foreach { call } => crate::iterate::run_foreach(call, env).await,

        Expr::For(for_expr) => crate::iterate::run_for_collect(for_expr, env).await,
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::String(s) => Value::Text(s.clone()),
        Literal::Number(n) => Value::Number(*n),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

async fn evaluate_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    env: &Arc<Environment>,
) -> MlldResult<EvalValue> {
    // Equality over a missing reference is "undefined": not equal to
    // anything, including null.
    if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
        let left = resolve_operand_for_equality(lhs, env).await?;
        let right = resolve_operand_for_equality(rhs, env).await?;
        let (value, security) = match (left, right) {
            (Some(a), Some(b)) => {
                let equal = a.value.loosely_equals(&b.value);
                (
                    Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }),
                    a.security.merged(&b.security),
                )
            }
            (a, b) => {
                let mut security = SecurityDescriptor::default();
                if let Some(a) = a {
                    security.merge(&a.security);
                }
                if let Some(b) = b {
                    security.merge(&b.security);
                }
                (Value::Bool(op == BinaryOp::Ne), security)
            }
        };
        return Ok(EvalValue::with_security(value, security));
    }

    let left = evaluate_expr(lhs, env).await?;

    // Logical operators short-circuit and return an operand value.
    match op {
        BinaryOp::And => {
            if !left.value.is_truthy() {
                return Ok(left);
            }
            let right = evaluate_expr(rhs, env).await?;
            return Ok(EvalValue::with_security(
                right.value,
                left.security.merged(&right.security),
            ));
        }
        BinaryOp::Or => {
            if left.value.is_truthy() {
                return Ok(left);
            }
            let right = evaluate_expr(rhs, env).await?;
            return Ok(EvalValue::with_security(
                right.value,
                left.security.merged(&right.security),
            ));
        }
        _ => {}
    }

    let right = evaluate_expr(rhs, env).await?;
    let security = left.security.merged(&right.security);

    let value = match op {
        BinaryOp::Add => {
            // `+` concatenates as soon as either side is textual.
            if matches!(left.value.unwrap_imported(), Value::Text(_) | Value::Path(_))
                || matches!(right.value.unwrap_imported(), Value::Text(_) | Value::Path(_))
            {
                Value::Text(format!("{}{}", left.value.to_text(), right.value.to_text()))
            } else {
                Value::Number(as_number(&left.value) + as_number(&right.value))
            }
        }
        BinaryOp::Sub => Value::Number(as_number(&left.value) - as_number(&right.value)),
        BinaryOp::Mul => Value::Number(as_number(&left.value) * as_number(&right.value)),
        BinaryOp::Div => Value::Number(as_number(&left.value) / as_number(&right.value)),
        BinaryOp::Rem => Value::Number(as_number(&left.value) % as_number(&right.value)),
        BinaryOp::Lt => Value::Bool(as_number(&left.value) < as_number(&right.value)),
        BinaryOp::Le => Value::Bool(as_number(&left.value) <= as_number(&right.value)),
        BinaryOp::Gt => Value::Bool(as_number(&left.value) > as_number(&right.value)),
        BinaryOp::Ge => Value::Bool(as_number(&left.value) >= as_number(&right.value)),
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => {
            return Err(MlldError::internal("binary operator handled above"));
        }
    };

    Ok(EvalValue::with_security(value, security))
}

async fn resolve_operand_for_equality(
    expr: &Expr,
    env: &Arc<Environment>,
) -> MlldResult<Option<EvalValue>> {
    match expr {
        Expr::Ref(var_ref) => resolve_ref_opt(env, var_ref, ResolutionContext::Equality),
        other => evaluate_expr(other, env).await.map(Some),
    }
}

/// Numeric coercion: numbers pass through, numeric text parses, booleans
/// map to 0/1, everything else is NaN.
fn as_number(value: &Value) -> f64 {
    match value.unwrap_imported() {
        Value::Number(n) => *n,
        Value::Text(s) | Value::Path(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Null => 0.0,
        Value::Structured(sv) => match &sv.data {
            serde_json::Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            serde_json::Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        },
        _ => f64::NAN,
    }
}

/// Evaluate a `<path>` loader: a single file, or a glob expanding to an
/// array of file results. Loaded values carry `file_system` taint.
async fn load_content(path: &str, env: &Arc<Environment>) -> MlldResult<EvalValue> {
    let security = SecurityDescriptor::tainted(taint::FILE_SYSTEM);
    let base = env.path_context();

    if is_glob(path) {
        let paths = env.loader().expand_glob(path, &base).await?;
        let mut items = Vec::with_capacity(paths.len());
        for file in paths {
            let checked = env.security_manager().check_path(&file, PathMode::Read)?;
            items.push(load_one(&checked, env).await?);
        }
        return Ok(EvalValue::with_security(Value::Array(items), security));
    }

    let checked = env
        .security_manager()
        .check_path(&base.join(path), PathMode::Read)?;
    let value = load_one(&checked, env).await?;
    Ok(EvalValue::with_security(value, security))
}

async fn load_one(path: &std::path::Path, env: &Arc<Environment>) -> MlldResult<Value> {
    let loaded = env.loader().load(path).await?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let path_text = loaded.path.to_string_lossy().to_string();

    let structured = match extension {
        "json" => {
            let data: serde_json::Value = serde_json::from_str(&loaded.text)?;
            StructuredValue::loaded("json", loaded.text, data, &path_text)
        }
        "csv" => StructuredValue::loaded(
            "csv",
            loaded.text.clone(),
            serde_json::Value::String(loaded.text),
            &path_text,
        ),
        "xml" => StructuredValue::loaded(
            "xml",
            loaded.text.clone(),
            serde_json::Value::String(loaded.text),
            &path_text,
        ),
        _ => StructuredValue::loaded(
            "text",
            loaded.text.clone(),
            serde_json::Value::String(loaded.text),
            &path_text,
        ),
    };
    Ok(Value::Structured(structured))
}
