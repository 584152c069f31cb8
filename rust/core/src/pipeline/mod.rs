//! The pipeline engine.
//!
//! `a | s1 | s2` preprocesses into logical stages, each carrying the
//! builtin effects that observe its output, with the source itself as
//! stage 0. Stages execute sequentially on one logical thread; `retry`
//! re-runs the previous stage with an incremented attempt counter;
//! parallel groups fan out one logical stage across branches.

mod parallel;

use std::sync::Arc;

use mlld_ast::{BuiltinEffect, Expr, FormatHint, PipelineExpr, StageSpec};

use crate::effects::Effect;
use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::interpreter::call::{call_by_name, ExecOutcome, StageContext};
use crate::interpreter::expr::evaluate_expr;
use crate::security_manager::PathMode;
use crate::value::{EvalValue, StructuredValue, Value};

pub(crate) use parallel::run_group;

/// One record of a stage handing its output to the next stage.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub input: Value,
    pub output: Value,
    pub try_count: u32,
}

/// What one stage execution produced.
enum StageResult {
    Continue(EvalValue),
    Retry,
}

/// A branch of a parallel group.
#[derive(Debug, Clone)]
pub(crate) struct GroupBranch {
    pub name: String,
    pub args: Vec<Expr>,
}

/// How a logical stage executes.
enum StageExec {
    /// Stage 0: the pipeline source. Retryable only when it is a
    /// function call.
    Source(Expr),
    Call { name: String, args: Vec<Expr> },
    Group(Vec<GroupBranch>),
}

/// A logical stage plus the builtin effects observing its output.
struct LogicalStage {
    exec: StageExec,
    effects: Vec<BuiltinEffect>,
}

impl LogicalStage {
    fn retryable_as_target(&self) -> Result<(), &'static str> {
        match &self.exec {
            StageExec::Source(Expr::Call(_)) => Ok(()),
            StageExec::Source(_) => Err("the pipeline source is not retryable"),
            StageExec::Group(_) => Err("parallel groups do not honor retry"),
            StageExec::Call { .. } => Ok(()),
        }
    }
}

/// Preprocess the raw stage list into logical stages. Builtins attach to
/// the logical stage preceding them; with the source always present as
/// stage 0, a builtin-only pipeline degenerates to effects on the source.
fn preprocess(pipe: &PipelineExpr) -> MlldResult<Vec<LogicalStage>> {
    let mut stages = vec![LogicalStage {
        exec: StageExec::Source(pipe.source.clone()),
        effects: Vec::new(),
    }];

    for spec in &pipe.stages {
        match spec {
            StageSpec::Call { name, args } => stages.push(LogicalStage {
                exec: StageExec::Call {
                    name: name.clone(),
                    args: args.clone(),
                },
                effects: Vec::new(),
            }),
            StageSpec::Builtin(effect) => {
                let last = stages.last_mut().ok_or_else(|| {
                    MlldError::internal("pipeline preprocessing lost the source stage")
                })?;
                last.effects.push(effect.clone());
            }
            StageSpec::Group { branches } => {
                let mut group = Vec::with_capacity(branches.len());
                for branch in branches {
                    match branch {
                        StageSpec::Call { name, args } => group.push(GroupBranch {
                            name: name.clone(),
                            args: args.clone(),
                        }),
                        _ => {
                            return Err(MlldError::internal(
                                "parallel groups may only contain function references",
                            ));
                        }
                    }
                }
                stages.push(LogicalStage {
                    exec: StageExec::Group(group),
                    effects: Vec::new(),
                });
            }
        }
    }

    Ok(stages)
}

/// Run a pipeline to completion.
///
/// # Errors
///
/// `INVALID_RETRY` for illegal retries, `GUARD_DENIED` when a guard
/// blocks a stage, `PARALLEL_BRANCH_FAILED` when a group branch errors.
pub async fn run_pipeline(pipe: &PipelineExpr, env: &Arc<Environment>) -> MlldResult<EvalValue> {
    let stages = preprocess(pipe)?;
    let count = stages.len();

    let mut try_counts = vec![1u32; count];
    let mut stage_inputs: Vec<Option<EvalValue>> = vec![None; count];
    let mut history: Vec<HistoryEntry> = Vec::new();

    let mut index = 0usize;
    let mut input = EvalValue::new(Value::Null);
    // Set while the retry target re-executes; a retry requested in that
    // window would nest, which is forbidden.
    let mut serving_retry = false;

    loop {
        if env.cancel().is_cancelled() {
            return Err(MlldError::new(ErrorKind::Cancelled));
        }

        stage_inputs[index] = Some(input.clone());
        let stage = &stages[index];

        let framed_input = apply_format_hint(&input, pipe.format);
        let result = execute_stage(
            stage,
            index,
            try_counts[index],
            &framed_input,
            &history,
            env,
        )
        .await?;

        match result {
            StageResult::Continue(value) => {
                for effect in &stage.effects {
                    run_builtin_effect(effect, &value.value, env).await?;
                }
                serving_retry = false;

                if index + 1 < count {
                    history.push(HistoryEntry {
                        input: input.value.clone(),
                        output: value.value.clone(),
                        try_count: try_counts[index],
                    });
                    input = value;
                    index += 1;
                } else {
                    return Ok(value);
                }
            }
            StageResult::Retry => {
                if serving_retry {
                    return Err(MlldError::new(ErrorKind::InvalidRetry {
                        reason: "a stage re-run by retry cannot itself request retry".into(),
                    }));
                }
                if index == 0 {
                    return Err(MlldError::new(ErrorKind::InvalidRetry {
                        reason: "stage 0 has no previous stage to retry".into(),
                    }));
                }
                let target = index - 1;
                if let Err(reason) = stages[target].retryable_as_target() {
                    return Err(MlldError::new(ErrorKind::InvalidRetry {
                        reason: reason.into(),
                    }));
                }
                try_counts[target] += 1;
                serving_retry = true;
                index = target;
                input = stage_inputs[target].clone().unwrap_or_default();
                tracing::debug!(stage = target, attempt = try_counts[target], "retrying stage");
            }
        }
    }
}

async fn execute_stage(
    stage: &LogicalStage,
    index: usize,
    try_count: u32,
    input: &EvalValue,
    history: &[HistoryEntry],
    env: &Arc<Environment>,
) -> MlldResult<StageResult> {
    let stage_ctx = StageContext {
        try_count,
        stage: index,
        input: input.clone(),
        history: history.iter().map(|entry| entry.output.clone()).collect(),
    };

    match &stage.exec {
        StageExec::Source(expr) => match expr {
            // A function-call source participates in retry: it receives
            // the stage context so `@ctx.try` reflects re-runs.
            Expr::Call(call) => {
                let mut args = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    args.push(evaluate_expr(arg, env).await?);
                }
                match call_by_name(&call.target, args, env, Some(&stage_ctx)).await? {
                    ExecOutcome::Value(value) => Ok(StageResult::Continue(value)),
                    ExecOutcome::Retry => Ok(StageResult::Retry),
                }
            }
            other => Ok(StageResult::Continue(evaluate_expr(other, env).await?)),
        },

        StageExec::Call { name, args } => {
            let mut call_args = Vec::with_capacity(args.len() + 1);
            call_args.push(input.clone());
            for arg in args {
                call_args.push(evaluate_expr(arg, env).await?);
            }
            match call_by_name(name, call_args, env, Some(&stage_ctx)).await? {
                ExecOutcome::Value(value) => Ok(StageResult::Continue(value)),
                ExecOutcome::Retry => Ok(StageResult::Retry),
            }
        }

        StageExec::Group(branches) => {
            let value = run_group(branches, input, &stage_ctx, env).await?;
            Ok(StageResult::Continue(value))
        }
    }
}

/// Frame a textual input for lazy parsing when the pipeline carries a
/// format hint. Already-structured inputs pass through.
fn apply_format_hint(input: &EvalValue, hint: Option<FormatHint>) -> EvalValue {
    let Some(hint) = hint else {
        return input.clone();
    };
    let Value::Text(text) = &input.value else {
        return input.clone();
    };

    let data = match hint {
        FormatHint::Json => serde_json::from_str(text)
            .unwrap_or_else(|_| serde_json::Value::String(text.clone())),
        FormatHint::Csv | FormatHint::Xml | FormatHint::Text => {
            serde_json::Value::String(text.clone())
        }
    };
    let structured = StructuredValue::new(
        hint.as_str(),
        text.clone(),
        data,
        crate::value::StructuredMetadata {
            source: "pipeline-format".into(),
            path: None,
        },
    );
    input.derive(Value::Structured(structured))
}

/// Run one builtin effect against a stage's output. Effects never mutate
/// the pipeline value.
pub(crate) async fn run_builtin_effect(
    effect: &BuiltinEffect,
    value: &Value,
    env: &Arc<Environment>,
) -> MlldResult<()> {
    match effect {
        BuiltinEffect::Show => {
            env.sink()
                .emit(Effect::Both(format!("{}\n", value.to_text())))?;
        }
        BuiltinEffect::Log => {
            env.sink()
                .emit(Effect::Stderr(format!("{}\n", value.to_text())))?;
        }
        BuiltinEffect::Output { path } => {
            let checked = env
                .security_manager()
                .check_path(std::path::Path::new(path), PathMode::Write)?;
            env.sink().emit(Effect::File {
                path: checked,
                append: false,
                contents: value.to_text(),
            })?;
        }
    }
    Ok(())
}
