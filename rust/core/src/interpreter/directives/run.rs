//! `/run <command>` and `/run sh { … }`

use std::sync::Arc;

use mlld_ast::{Directive, GuardTiming, Lang, OpKind, RunSpec};

use crate::effects::Effect;
use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::exec::RunRequest;
use crate::guards::GuardVerdict;
use crate::resolve::ResolutionContext;
use crate::security::SecurityDescriptor;
use crate::security_manager::SecurityContext;
use crate::value::Value;

/// Execute a one-shot command or a multi-line language block, appending
/// its output to the document.
pub async fn evaluate(
    directive: &Directive,
    spec: &RunSpec,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let mut mx = env.security_snapshot();
    for extra_label in &directive.labels {
        mx.labels.insert(extra_label.clone());
    }
    if let GuardVerdict::Deny { guard, reason } =
        env.guards().check(GuardTiming::Before, OpKind::Run, &mx)
    {
        return Err(MlldError::new(ErrorKind::GuardDenied { guard, reason }));
    }

    let output = match spec {
        RunSpec::Command { template } => {
            let (command, _) = super::super::template::interpolate_tracked(
                template,
                env,
                ResolutionContext::Interpolation,
            )?;
            run_command_line(&command, "run", env).await?
        }
        RunSpec::Block { lang, source } => {
            let runner = env.runners().for_lang(*lang)?;
            let request = RunRequest {
                source: source.clone(),
                params: Vec::new(),
                shadow: env.shadow_envs().for_lang(*lang),
                timeout_ms: env.config().exec_timeout_ms,
                cancel: env.cancel().clone(),
            };
            runner.run(request).await?.value
        }
    };

    let mut result_mx = mx;
    result_mx.merge(&SecurityDescriptor::tainted(
        crate::security::taint::COMMAND_OUTPUT,
    ));
    if let GuardVerdict::Deny { guard, reason } =
        env.guards().check(GuardTiming::After, OpKind::Run, &result_mx)
    {
        return Err(MlldError::new(ErrorKind::GuardDenied { guard, reason }));
    }

    let text = output.to_text();
    if !text.is_empty() {
        env.sink().emit(Effect::Both(format!("{text}\n")))?;
    }
    Ok(output)
}

/// Validate and execute a single command line through the security
/// manager and the `sh` runner. Shared by `/run` and command-template
/// executables.
///
/// # Errors
///
/// `INVALID_COMMAND` for chained commands, `POLICY_DENIED` from the
/// security manager, `COMMAND_EXECUTION_FAILED` on nonzero exit.
pub async fn run_command_line(
    command: &str,
    directive: &str,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err(MlldError::new(ErrorKind::InvalidCommand {
            reason: "empty command".into(),
        }));
    }
    // One-shot commands only; multi-command shells require `sh { … }`.
    if trimmed.contains("&&")
        || trimmed.contains("||")
        || trimmed.contains(';')
        || trimmed.contains('\n')
    {
        return Err(MlldError::new(ErrorKind::InvalidCommand {
            reason: "chained commands are not allowed; use `sh { … }` for multi-command shells"
                .into(),
        }));
    }

    let cx = SecurityContext {
        directive: directive.to_string(),
        ..SecurityContext::default()
    };
    env.security_manager().check_command(trimmed, &cx).await?;

    let runner = env.runners().for_lang(Lang::Sh)?;
    let request = RunRequest {
        source: trimmed.to_string(),
        params: Vec::new(),
        shadow: Vec::new(),
        timeout_ms: env.config().exec_timeout_ms,
        cancel: env.cancel().clone(),
    };
    let output = runner.run(request).await?;
    Ok(output.value)
}
