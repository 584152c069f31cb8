//! `/exe @f(args) = <body>` and shadow-environment capture.

use std::sync::Arc;

use mlld_ast::{Directive, ExeBody, Lang};

use crate::env::Environment;
use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::exec::{ExecBodyDef, ExecDef};
use crate::security::{label, taint, SecurityDescriptor};
use crate::value::Value;
use crate::variable::{Variable, VariableSource};

/// Declare an executable. The definition captures the shadow environments
/// and a weak reference to the declaring environment, so sibling names
/// resolve consistently after import. The `env with { tools: … }` form
/// evaluates its expression here, once, so the body sees the scoped
/// `@tools` value as it was at declaration.
pub async fn evaluate(
    directive: &Directive,
    name: &str,
    params: &[String],
    body: &ExeBody,
    env_tools: Option<&mlld_ast::Expr>,
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    let (body_def, mcp_tool) = match body {
        ExeBody::Command { template } => (ExecBodyDef::Command(template.clone()), None),
        ExeBody::Language { lang, source } => (
            ExecBodyDef::Language {
                lang: *lang,
                source: source.clone(),
            },
            None,
        ),
        ExeBody::Template { template } => (ExecBodyDef::Template(template.clone()), None),
        ExeBody::Expr { expr } => (ExecBodyDef::Expr(expr.clone()), None),
        ExeBody::When { arms, first } => (
            ExecBodyDef::When {
                arms: arms.clone(),
                first: *first,
            },
            None,
        ),
        ExeBody::McpTool { tool } => (
            ExecBodyDef::Mcp { tool: tool.clone() },
            Some(tool.clone()),
        ),
    };

    let captured_tools = match env_tools {
        Some(expr) => Some(super::super::expr::evaluate_expr(expr, env).await?),
        None => None,
    };

    let def = Arc::new(ExecDef {
        name: name.to_string(),
        params: params.to_vec(),
        body: body_def,
        shadow: env.shadow_envs(),
        module_env: Arc::downgrade(env),
        captured_tools: captured_tools.clone(),
        mcp_tool: mcp_tool.clone(),
    });

    // MCP proxies are untrusted from the moment they are bound, so
    // `before op:exe` guards can block them ahead of any invocation.
    let mut security = env.security_snapshot();
    if let Some(tools) = &captured_tools {
        security.merge(&tools.security);
    }
    if let Some(tool) = &mcp_tool {
        security.merge(
            &SecurityDescriptor::tainted(taint::SRC_MCP)
                .with_label(label::UNTRUSTED)
                .with_source(format!("mcp:{tool}")),
        );
    }

    let mut variable = Variable::new(name, Value::Executable(Arc::clone(&def)))
        .with_source(VariableSource::directive("exe"))
        .with_definition(directive.location.clone())
        .with_security(security);
    variable.internal.captured_shadow_envs = Some(Arc::new(def.shadow.clone()));
    variable.internal.mcp_tool = mcp_tool;
    env.set(variable);

    Ok(Value::Null)
}

/// `/exe @js = { fnA, fnB }` — copy named language-bodied executables
/// into the language's shadow environment for this scope.
pub fn evaluate_shadow_capture(
    lang: Lang,
    names: &[String],
    env: &Arc<Environment>,
) -> MlldResult<Value> {
    for name in names {
        let variable = env
            .get(name)
            .ok_or_else(|| MlldError::new(ErrorKind::UnknownVariable { name: name.clone() }))?;
        let def = variable
            .value
            .as_executable()
            .ok_or_else(|| MlldError::new(ErrorKind::NotCallable { name: name.clone() }))?;
        let mut func = def.as_shadow_fn().ok_or_else(|| {
            MlldError::new(ErrorKind::NotCallable { name: name.clone() })
        })?;
        func.lang = lang;
        env.add_shadow_fn(func);
    }
    Ok(Value::Null)
}
