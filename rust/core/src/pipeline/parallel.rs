//! Parallel groups: `A || B || C` as one logical stage.
//!
//! Branch inputs are cloned, branches execute concurrently bounded by the
//! configured parallel limit, and results collect in source order into a
//! JSON array of branch texts for the next stage's input.

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;

use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::interpreter::call::{call_by_name, ExecOutcome, StageContext};
use crate::interpreter::expr::evaluate_expr;
use crate::security::SecurityDescriptor;
use crate::value::{EvalValue, Value};

use super::GroupBranch;

/// Execute every branch of a group against a clone of the stage input.
///
/// Execution order is unspecified; result order matches source order.
/// Guard denials propagate as-is; any other branch error fails the stage
/// with `PARALLEL_BRANCH_FAILED`.
pub(crate) async fn run_group(
    branches: &[GroupBranch],
    input: &EvalValue,
    stage_ctx: &StageContext,
    env: &Arc<Environment>,
) -> MlldResult<EvalValue> {
    let semaphore = Arc::new(Semaphore::new(env.config().parallel_limit.max(1)));

    let mut futures: FuturesUnordered<_> = branches
        .iter()
        .enumerate()
        .map(|(index, branch)| {
            let branch = branch.clone();
            let input = input.clone();
            let stage_ctx = stage_ctx.clone();
            // Branches never share an environment map; each gets a child.
            let branch_env = env.create_child();
            let semaphore = Arc::clone(&semaphore);

            async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (
                        index,
                        Err(MlldError::internal("concurrency semaphore closed")),
                    );
                };
                let result = run_branch(&branch, input, &stage_ctx, &branch_env).await;
                (index, result)
            }
        })
        .collect();

    let mut results: Vec<Option<EvalValue>> = vec![None; branches.len()];
    while let Some((index, result)) = futures.next().await {
        match result {
            Ok(value) => results[index] = Some(value),
            Err(err) if err.kind.is_denial() => return Err(err),
            Err(err) => {
                return Err(MlldError::new(ErrorKind::ParallelBranchFailed {
                    index,
                    reason: err.to_string(),
                }));
            }
        }
    }

    // Source-order collection, serialized as JSON text for the next stage.
    let mut texts = Vec::with_capacity(results.len());
    let mut security = SecurityDescriptor::default();
    for result in results {
        let value =
            result.ok_or_else(|| MlldError::internal("parallel branch produced no result"))?;
        texts.push(value.value.to_text());
        security.merge(&value.security);
    }
    let json = serde_json::to_string(&texts)?;
    Ok(EvalValue::with_security(Value::Text(json), security))
}

async fn run_branch(
    branch: &GroupBranch,
    input: EvalValue,
    stage_ctx: &StageContext,
    branch_env: &Arc<Environment>,
) -> MlldResult<EvalValue> {
    let mut args = Vec::with_capacity(branch.args.len() + 1);
    args.push(input);
    for arg in &branch.args {
        args.push(evaluate_expr(arg, branch_env).await?);
    }

    match call_by_name(&branch.name, args, branch_env, Some(stage_ctx)).await? {
        ExecOutcome::Value(value) => Ok(value),
        ExecOutcome::Retry => Err(MlldError::new(ErrorKind::InvalidRetry {
            reason: "retries inside a parallel group are not supported; guards that need \
                     retry must live after the group"
                .into(),
        })),
    }
}
