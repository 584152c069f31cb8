//! The directive router: trace bookkeeping, hooks, and dispatch.

use std::sync::Arc;

use async_recursion::async_recursion;
use mlld_ast::{Directive, DirectiveKind};

use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult, TraceFrame};
use crate::value::Value;

use super::directives;
use super::HookDecision;

/// Route one directive to its evaluator.
///
/// Pushes a trace frame, runs pre-hooks, dispatches on the directive
/// kind, runs post-hooks, and pops the frame. On unwind the trace is
/// attached to any error that lacks one.
///
/// # Errors
///
/// `HOOK_ABORTED` when a pre-hook aborts; otherwise whatever the inner
/// evaluator raises, enriched with location and trace.
#[async_recursion]
pub async fn evaluate_directive(
    directive: &Directive,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let frame = TraceFrame {
        kind: directive.kind_name().to_string(),
        principal: directive.principal(),
        location: directive.location.clone(),
    };
    tracing::debug!(kind = %frame.kind, principal = %frame.principal, "evaluating directive");
    env.push_directive(frame);

    let result = run_hooks_and_dispatch(directive, env).await;

    let result = result.map_err(|err| {
        err.with_location(directive.location.clone())
            .with_trace(env.trace_snapshot())
    });
    env.pop_directive();
    result
}

async fn run_hooks_and_dispatch(
    directive: &Directive,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    for hook in env.hooks() {
        if let HookDecision::Abort(reason) = hook.before(directive, env) {
            return Err(MlldError::new(ErrorKind::HookAborted { reason }));
        }
    }

    let value = dispatch(directive, env).await?;

    for hook in env.hooks() {
        hook.after(directive, env, &value);
    }

    Ok(value)
}

async fn dispatch(directive: &Directive, env: &Arc<Environment>) -> MlldResult<Value> {
    match &directive.kind {
        DirectiveKind::Var { name, value } => {
            directives::var::evaluate(directive, name, value, env).await
        }
        DirectiveKind::Path { name, value } => {
            directives::path::evaluate(directive, name, value, env)
        }
        DirectiveKind::Exe {
            name,
            params,
            body,
            env_tools,
        } => {
            directives::exe::evaluate(directive, name, params, body, env_tools.as_ref(), env)
                .await
        }
        DirectiveKind::ShadowCapture { lang, names } => {
            directives::exe::evaluate_shadow_capture(*lang, names, env)
        }
        DirectiveKind::Run { spec } => directives::run::evaluate(directive, spec, env).await,
        DirectiveKind::Show { value } => directives::show::evaluate(value, env).await,
        DirectiveKind::Output {
            value,
            target,
            append,
        } => directives::output::evaluate(value, target, *append, env).await,
        DirectiveKind::Import {
            clause,
            source,
            import_type,
            cache,
        } => {
            crate::import::run_import(directive, clause, source, *import_type, *cache, env).await
        }
        DirectiveKind::For {
            binding,
            source,
            body,
            parallel,
        } => crate::iterate::run_for_directive(binding, source, body, parallel.as_ref(), env).await,
        DirectiveKind::When { arms, first } => {
            directives::when::evaluate(arms, *first, env).await
        }
        DirectiveKind::Export { names } => directives::export::evaluate(names, env),
        DirectiveKind::Guard {
            name,
            trigger,
            arms,
        } => directives::guard::evaluate(name, *trigger, arms, env),
        DirectiveKind::Comment { .. } => Ok(Value::Null),
    }
}
