//! Executable invocation.
//!
//! Calls resolve the definition, gate through `before op:exe` guards,
//! bind parameters in a child of the captured module environment, execute
//! the body, wrap structured results, and gate again through `after
//! op:exe` guards. MCP-backed executables taint their results.

use std::sync::Arc;

use mlld_ast::{GuardTiming, Lang, OpKind, WhenAction, WhenArm};

use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::exec::{ExecBodyDef, ExecDef, RunRequest};
use crate::guards::GuardVerdict;
use crate::resolve::ResolutionContext;
use crate::security::{label, taint, SecurityDescriptor};
use crate::value::{EvalValue, StructuredValue, TemplateDef, Value};
use crate::variable::{Variable, VariableSource};

use super::template::interpolate_tracked;

/// Pipeline stage bookkeeping injected into the body environment as
/// `@ctx`, `@input`, and `@p`.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// 1-based attempt number for the executing stage.
    pub try_count: u32,
    /// Zero-based stage index.
    pub stage: usize,
    pub input: EvalValue,
    /// Prior stage outputs, oldest first.
    pub history: Vec<Value>,
}

/// The outcome of invoking an executable.
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    Value(EvalValue),
    /// A `when` arm asked the pipeline to re-run the previous stage.
    Retry,
}

/// Resolve a name and invoke it.
///
/// # Errors
///
/// `UNKNOWN_VARIABLE` when the name is unbound, `NOT_CALLABLE` when it is
/// not an executable or template, plus whatever the body raises.
pub async fn call_by_name(
    name: &str,
    args: Vec<EvalValue>,
    env: &Arc<Environment>,
    stage: Option<&StageContext>,
) -> MlldResult<ExecOutcome> {
    let variable = env
        .get(name)
        .ok_or_else(|| MlldError::new(ErrorKind::UnknownVariable { name: name.into() }))?;

    match variable.value.unwrap_imported() {
        Value::Executable(def) => {
            let def = Arc::clone(def);
            call_executable(&def, &variable.security, args, env, stage).await
        }
        Value::Template(def) => {
            let def = Arc::clone(def);
            render_template(&def, &variable.security, args, env).map(ExecOutcome::Value)
        }
        _ => Err(MlldError::new(ErrorKind::NotCallable { name: name.into() })),
    }
}

/// Invoke an executable definition.
///
/// # Errors
///
/// `GUARD_DENIED` when a guard blocks the call; execution errors from the
/// body.
pub async fn call_executable(
    def: &Arc<ExecDef>,
    exe_security: &SecurityDescriptor,
    args: Vec<EvalValue>,
    env: &Arc<Environment>,
    stage: Option<&StageContext>,
) -> MlldResult<ExecOutcome> {
    // Operation metadata: the executable's own descriptor, every
    // argument's descriptor, and the scope snapshot.
    let mut mx = exe_security.clone();
    for arg in &args {
        mx.merge(&arg.security);
    }
    if let Some(tools) = &def.captured_tools {
        mx.merge(&tools.security);
    }
    mx.merge(&env.security_snapshot());

    if let GuardVerdict::Deny { guard, reason } =
        env.guards().check(GuardTiming::Before, OpKind::Exe, &mx)
    {
        return Err(MlldError::new(ErrorKind::GuardDenied { guard, reason }));
    }

    // Sibling resolution: captured module environment over the call site.
    let base = def.module_env.upgrade().unwrap_or_else(|| Arc::clone(env));
    let body_env = base.create_child();

    // The scoped `@tools` capture binds first; explicit parameters of the
    // same name win.
    if let Some(tools) = &def.captured_tools {
        body_env.set(
            Variable::system("tools", tools.value.clone()).with_security(tools.security.clone()),
        );
    }
    for (index, param) in def.params.iter().enumerate() {
        let arg = args.get(index).cloned().unwrap_or_default();
        let variable = Variable::new(param.clone(), arg.value)
            .with_source(VariableSource::directive("exe-param"))
            .with_security(arg.security);
        body_env.set(variable);
    }
    if let Some(stage) = stage {
        inject_stage_context(&body_env, stage);
    }

    let outcome = execute_body(def, &args, mx.clone(), env, &body_env, stage).await?;

    let result = match outcome {
        ExecOutcome::Retry => return Ok(ExecOutcome::Retry),
        ExecOutcome::Value(value) => value,
    };

    if let GuardVerdict::Deny { guard, reason } =
        env.guards()
            .check(GuardTiming::After, OpKind::Exe, &result.security)
    {
        return Err(MlldError::new(ErrorKind::GuardDenied { guard, reason }));
    }

    Ok(ExecOutcome::Value(result))
}

fn inject_stage_context(body_env: &Arc<Environment>, stage: &StageContext) {
    let mut ctx = indexmap::IndexMap::new();
    ctx.insert("try".to_string(), Value::Number(f64::from(stage.try_count)));
    #[allow(clippy::cast_precision_loss)]
    ctx.insert("stage".to_string(), Value::Number(stage.stage as f64));
    ctx.insert("input".to_string(), stage.input.value.clone());
    body_env.set(Variable::system("ctx", Value::Object(ctx)));
    body_env.set(Variable::system("input", stage.input.value.clone()));
    body_env.set(Variable::system("p", Value::Array(stage.history.clone())));
}

async fn execute_body(
    def: &Arc<ExecDef>,
    args: &[EvalValue],
    mx: SecurityDescriptor,
    env: &Arc<Environment>,
    body_env: &Arc<Environment>,
    stage: Option<&StageContext>,
) -> MlldResult<ExecOutcome> {
    match &def.body {
        ExecBodyDef::Command(template) => {
            let (command, interp_security) =
                interpolate_tracked(template, body_env, ResolutionContext::Interpolation)?;
            let output =
                super::directives::run::run_command_line(&command, "exe", env).await?;
            let mut security = mx.merged(&interp_security);
            security.merge(&SecurityDescriptor::tainted(taint::COMMAND_OUTPUT));
            Ok(ExecOutcome::Value(EvalValue::with_security(
                output, security,
            )))
        }

        ExecBodyDef::Language { lang, source } => {
            let runner = env.runners().for_lang(*lang)?;
            let shadow_set = def.shadow.overlaid_on(&env.shadow_envs());
            let mut params: Vec<(String, Value)> = def
                .params
                .iter()
                .enumerate()
                .map(|(index, param)| {
                    (
                        param.clone(),
                        args.get(index).map(|a| a.value.clone()).unwrap_or_default(),
                    )
                })
                .collect();
            // The scoped `@tools` capture crosses into the runner like a
            // parameter; an explicit `tools` parameter wins.
            if let Some(tools) = &def.captured_tools {
                if !def.params.iter().any(|param| param == "tools") {
                    params.push(("tools".to_string(), tools.value.clone()));
                }
            }
            let request = RunRequest {
                source: source.clone(),
                params,
                shadow: shadow_set.for_lang(*lang),
                timeout_ms: env.config().exec_timeout_ms,
                cancel: env.cancel().clone(),
            };
            let output = runner.run(request).await?;

            let mut security = mx;
            if lang.is_shell() {
                security.merge(&SecurityDescriptor::tainted(taint::COMMAND_OUTPUT));
            }
            let value = wrap_exec_result(output.value, *lang, env);
            Ok(ExecOutcome::Value(EvalValue::with_security(value, security)))
        }

        ExecBodyDef::Template(template) => {
            let (text, interp_security) =
                interpolate_tracked(template, body_env, ResolutionContext::Display)?;
            Ok(ExecOutcome::Value(EvalValue::with_security(
                Value::Text(text),
                mx.merged(&interp_security),
            )))
        }

        ExecBodyDef::Expr(expr) => {
            let evaluated = super::expr::evaluate_expr(expr, body_env).await?;
            let security = mx.merged(&evaluated.security);
            Ok(ExecOutcome::Value(EvalValue::with_security(
                evaluated.value,
                security,
            )))
        }

        ExecBodyDef::When { arms, first } => {
            execute_when_body(arms, *first, mx, body_env, stage).await
        }

        ExecBodyDef::Mcp { tool } => {
            let json_args: Vec<serde_json::Value> =
                args.iter().map(|a| a.value.to_json()).collect();
            let result = env.runners().mcp().invoke(tool, json_args).await?;

            let structured = StructuredValue::from_data(
                crate::value::json_type_tag(&result),
                result,
                crate::value::StructuredMetadata {
                    source: format!("mcp:{tool}"),
                    path: None,
                },
            );
            let security = mx
                .with_taint(taint::SRC_MCP)
                .with_label(label::UNTRUSTED)
                .with_source(format!("mcp:{tool}"));
            Ok(ExecOutcome::Value(EvalValue::with_security(
                Value::Structured(structured),
                security,
            )))
        }
    }
}

async fn execute_when_body(
    arms: &[WhenArm],
    first: bool,
    mx: SecurityDescriptor,
    body_env: &Arc<Environment>,
    stage: Option<&StageContext>,
) -> MlldResult<ExecOutcome> {
    let mut result = Value::Null;
    let mut security = mx;

    for arm in arms {
        let cond = super::expr::evaluate_expr(&arm.cond, body_env).await?;
        security.merge(&cond.security);
        if !cond.value.is_truthy() {
            continue;
        }
        match &arm.action {
            WhenAction::Retry => {
                if stage.is_none() {
                    return Err(MlldError::new(ErrorKind::InvalidRetry {
                        reason: "retry is only legal inside pipeline stages".into(),
                    }));
                }
                return Ok(ExecOutcome::Retry);
            }
            WhenAction::Expr { expr } => {
                let evaluated = super::expr::evaluate_expr(expr, body_env).await?;
                security.merge(&evaluated.security);
                result = evaluated.value;
            }
            WhenAction::Directive { directive } => {
                super::router::evaluate_directive(directive, body_env).await?;
            }
        }
        if first {
            break;
        }
    }

    Ok(ExecOutcome::Value(EvalValue::with_security(
        result, security,
    )))
}

/// Wrap a structured embedded-language result; scalars stay raw.
fn wrap_exec_result(value: Value, lang: Lang, env: &Arc<Environment>) -> Value {
    if !env.config().structured_exec {
        return value;
    }
    match &value {
        Value::Array(_) | Value::Object(_) => {
            let data = value.to_json();
            Value::Structured(StructuredValue::exec_result(lang.as_str(), data))
        }
        _ => value,
    }
}

fn render_template(
    def: &Arc<TemplateDef>,
    template_security: &SecurityDescriptor,
    args: Vec<EvalValue>,
    env: &Arc<Environment>,
) -> MlldResult<EvalValue> {
    let body_env = env.create_child();
    for (index, param) in def.params.iter().enumerate() {
        let arg = args.get(index).cloned().unwrap_or_default();
        let variable = Variable::new(param.clone(), arg.value).with_security(arg.security);
        body_env.set(variable);
    }
    let (text, interp_security) =
        interpolate_tracked(&def.template, &body_env, ResolutionContext::Display)?;
    let mut security = template_security.clone();
    security.merge(&interp_security);
    Ok(EvalValue::with_security(Value::Text(text), security))
}
