//! The iterator engine: `/for`, `/for parallel`, and `foreach`.
//!
//! Iterators fan out independent work items (unlike pipeline groups,
//! which fan out branches of a single item). Parallel execution order is
//! unspecified; result order is always input order.

use std::num::NonZeroU32;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::Semaphore;

use mlld_ast::{CallExpr, Expr, ForBody, ForExpr, ParallelSpec};

use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::interpreter::call::{call_by_name, ExecOutcome};
use crate::interpreter::expr::evaluate_expr;
use crate::interpreter::router::evaluate_directive;
use crate::security::SecurityDescriptor;
use crate::value::{EvalValue, Value};
use crate::variable::Variable;

/// One item of an iteration: object iterations carry the key.
struct IterItem {
    key: Option<String>,
    value: Value,
}

fn items_of(value: &Value) -> MlldResult<Vec<IterItem>> {
    match value.unwrap_imported() {
        Value::Array(items) => Ok(items
            .iter()
            .map(|item| IterItem {
                key: None,
                value: item.clone(),
            })
            .collect()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(key, item)| IterItem {
                key: Some(key.clone()),
                value: item.clone(),
            })
            .collect()),
        Value::Structured(sv) => items_of(&Value::from_json(sv.data.clone())),
        other => Err(MlldError::new(ErrorKind::NotIterable {
            type_name: other.type_name().to_string(),
        })),
    }
}

/// Bind the loop variable (and `_key` for object iterations) in a fresh
/// child scope.
fn iteration_env(
    env: &Arc<Environment>,
    binding: &str,
    item: &IterItem,
    security: &SecurityDescriptor,
) -> Arc<Environment> {
    let child = env.create_child();
    child.set(Variable::new(binding, item.value.clone()).with_security(security.clone()));
    if let Some(key) = &item.key {
        child.set(Variable::system("_key", Value::text(key.clone())));
    }
    child
}

/// `/for [parallel] @x in @collection => action` — the statement form.
pub async fn run_for_directive(
    binding: &str,
    source: &Expr,
    body: &ForBody,
    parallel: Option<&ParallelSpec>,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let evaluated = evaluate_expr(source, env).await?;
    let items = items_of(&evaluated.value)?;

    match parallel {
        None => {
            for item in items {
                let child = iteration_env(env, binding, &item, &evaluated.security);
                run_body(body, &child).await?;
            }
        }
        Some(spec) => {
            let body = body.clone();
            run_items_parallel(
                items,
                spec,
                env,
                move |child| {
                    let body = body.clone();
                    async move { run_body(&body, &child).await }
                },
                binding,
                &evaluated.security,
            )
            .await?;
        }
    }
    Ok(Value::Null)
}

async fn run_body(body: &ForBody, env: &Arc<Environment>) -> MlldResult<Value> {
    match body {
        ForBody::Directive { directive } => evaluate_directive(directive, env).await,
        ForBody::Expr { expr } => Ok(evaluate_expr(expr, env).await?.value),
    }
}

/// The collection form: `for @x in @c => expr` evaluated for its values.
pub async fn run_for_collect(
    for_expr: &ForExpr,
    env: &Arc<Environment>,
) -> MlldResult<EvalValue> {
    let evaluated = evaluate_expr(&for_expr.source, env).await?;
    let items = items_of(&evaluated.value)?;
    let mut security = evaluated.security.clone();

    let values = match &for_expr.parallel {
        None => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let child =
                    iteration_env(env, &for_expr.binding, &item, &evaluated.security);
                let result = evaluate_expr(&for_expr.body, &child).await?;
                security.merge(&result.security);
                values.push(result.value);
            }
            values
        }
        Some(spec) => {
            let body = for_expr.body.clone();
            let results = run_items_parallel(
                items,
                spec,
                env,
                move |child| {
                    let body = body.clone();
                    async move { evaluate_expr(&body, &child).await.map(|r| r.value) }
                },
                &for_expr.binding,
                &evaluated.security,
            )
            .await?;
            results
        }
    };

    Ok(EvalValue::with_security(Value::Array(values), security))
}

/// Fan items out over a bounded pool, preserving input order in the
/// result. `(n)` caps concurrency below the global limit; `(n, rate)`
/// additionally paces issue through a per-iteration token bucket.
async fn run_items_parallel<F, Fut>(
    items: Vec<IterItem>,
    spec: &ParallelSpec,
    env: &Arc<Environment>,
    body: F,
    binding: &str,
    security: &SecurityDescriptor,
) -> MlldResult<Vec<Value>>
where
    F: Fn(Arc<Environment>) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = MlldResult<Value>> + Send,
{
    let global = env.config().parallel_limit.max(1);
    let cap = spec.cap.unwrap_or(global).clamp(1, global);
    let semaphore = Arc::new(Semaphore::new(cap));
    let pacer: Option<Arc<DefaultDirectRateLimiter>> = spec
        .rate
        .and_then(NonZeroU32::new)
        .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));

    let mut futures: FuturesUnordered<_> = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let child = iteration_env(env, binding, &item, security);
            let semaphore = Arc::clone(&semaphore);
            let pacer = pacer.clone();
            let cancel = env.cancel().clone();
            let body = body.clone();

            async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, Err(MlldError::internal("semaphore closed")));
                };
                if let Some(pacer) = &pacer {
                    pacer.until_ready().await;
                }
                if cancel.is_cancelled() {
                    return (index, Err(MlldError::new(ErrorKind::Cancelled)));
                }
                (index, body(child).await)
            }
        })
        .collect();

    let mut results: Vec<Option<Value>> = Vec::new();
    results.resize_with(futures.len(), || None);
    while let Some((index, result)) = futures.next().await {
        results[index] = Some(result?);
    }

    results
        .into_iter()
        .map(|slot| slot.ok_or_else(|| MlldError::internal("iteration produced no result")))
        .collect()
}

/// `foreach @fn(@a, @b)`: invoke the function once per tuple of the
/// cartesian product, in row-major order.
pub async fn run_foreach(call: &CallExpr, env: &Arc<Environment>) -> MlldResult<EvalValue> {
    let mut axes: Vec<Vec<Value>> = Vec::with_capacity(call.args.len());
    let mut security = SecurityDescriptor::default();
    for arg in &call.args {
        let evaluated = evaluate_expr(arg, env).await?;
        security.merge(&evaluated.security);
        match evaluated.value.unwrap_imported() {
            Value::Array(items) => axes.push(items.clone()),
            other => {
                return Err(MlldError::new(ErrorKind::NotIterable {
                    type_name: other.type_name().to_string(),
                }));
            }
        }
    }

    if axes.iter().any(Vec::is_empty) {
        return Ok(EvalValue::with_security(Value::Array(Vec::new()), security));
    }

    let total: usize = axes.iter().map(Vec::len).product();
    let mut results = Vec::with_capacity(total);
    let mut odometer = vec![0usize; axes.len()];

    loop {
        let args: Vec<EvalValue> = odometer
            .iter()
            .zip(&axes)
            .map(|(&digit, axis)| {
                EvalValue::with_security(axis[digit].clone(), security.clone())
            })
            .collect();
        match call_by_name(&call.target, args, env, None).await? {
            ExecOutcome::Value(value) => {
                security.merge(&value.security);
                results.push(value.value);
            }
            ExecOutcome::Retry => {
                return Err(MlldError::new(ErrorKind::InvalidRetry {
                    reason: "retry is only legal inside pipeline stages".into(),
                }));
            }
        }

        // Advance the odometer, rightmost axis fastest.
        let mut position = axes.len();
        loop {
            if position == 0 {
                return Ok(EvalValue::with_security(Value::Array(results), security));
            }
            position -= 1;
            odometer[position] += 1;
            if odometer[position] < axes[position].len() {
                break;
            }
            odometer[position] = 0;
        }
    }
}
