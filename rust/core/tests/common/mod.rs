//! Shared helpers for the integration tests: environment builders,
//! directive shorthands, a scripted embedded-code runner, and a mock MCP
//! host.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;

use mlld_ast::{
    Directive, DirectiveKind, ExeBody, Expr, Lang, Literal, Template, TemplatePart,
    TemplateSyntax, VarRef, WhenAction, WhenArm,
};
use mlld_core::effects::CollectingSink;
use mlld_core::env::Environment;
use mlld_core::error::{MlldError, MlldResult};
use mlld_core::exec::{CodeRunner, McpHost, RunOutput, RunRequest, RunnerSet};
use mlld_core::value::Value;

/// An environment with a collecting sink and a scripted runner, returned
/// alongside the sink for assertions.
pub fn test_env() -> (Arc<Environment>, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let mut runners = RunnerSet::empty();
    runners.register(Arc::new(ScriptedRunner));
    let env = Environment::builder()
        .sink(Arc::clone(&sink) as Arc<dyn mlld_core::effects::EffectSink>)
        .runners(runners)
        .build();
    (env, sink)
}

// ---------------------------------------------------------------------------
// Directive shorthands
// ---------------------------------------------------------------------------

pub fn d(kind: DirectiveKind) -> Directive {
    Directive::new(kind)
}

pub fn d_var(name: &str, value: Expr) -> Directive {
    d(DirectiveKind::Var {
        name: name.into(),
        value,
    })
}

pub fn d_show(value: Expr) -> Directive {
    d(DirectiveKind::Show { value })
}

pub fn d_export(names: &[&str]) -> Directive {
    d(DirectiveKind::Export {
        names: names.iter().map(|n| (*n).to_string()).collect(),
    })
}

pub fn d_exe(name: &str, params: &[&str], body: ExeBody) -> Directive {
    d(DirectiveKind::Exe {
        name: name.into(),
        params: params.iter().map(|p| (*p).to_string()).collect(),
        body,
        env_tools: None,
    })
}

/// `/exe @name(params) = env with { tools: <expr> } <body>`
pub fn d_exe_env(name: &str, params: &[&str], tools: Expr, body: ExeBody) -> Directive {
    d(DirectiveKind::Exe {
        name: name.into(),
        params: params.iter().map(|p| (*p).to_string()).collect(),
        body,
        env_tools: Some(tools),
    })
}

/// `@name` (with dotted fields given as `name.field.field`).
pub fn r(path: &str) -> Expr {
    let mut parts = path.split('.');
    let name = parts.next().unwrap_or_default().to_string();
    let fields = parts
        .map(|segment| mlld_ast::FieldSeg::Key(segment.to_string()))
        .collect();
    Expr::Ref(VarRef { name, fields })
}

pub fn s(text: &str) -> Expr {
    Expr::Literal(Literal::String(text.into()))
}

pub fn n(value: f64) -> Expr {
    Expr::Literal(Literal::Number(value))
}

pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op: mlld_ast::BinaryOp::Eq,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn truth() -> Expr {
    Expr::Literal(Literal::Bool(true))
}

pub fn arm_value(cond: Expr, value: Expr) -> WhenArm {
    WhenArm {
        cond,
        action: WhenAction::Expr { expr: value },
    }
}

pub fn arm_retry(cond: Expr) -> WhenArm {
    WhenArm {
        cond,
        action: WhenAction::Retry,
    }
}

/// A `::…::` template from alternating literal text and `@refs`, written
/// as `tpl(&[T("Accepted: "), I("input")])`.
pub enum Part<'a> {
    T(&'a str),
    I(&'a str),
}

pub fn tpl(parts: &[Part<'_>]) -> Template {
    Template {
        parts: parts
            .iter()
            .map(|part| match part {
                Part::T(text) => TemplatePart::Text((*text).to_string()),
                Part::I(path) => {
                    let mut split = path.split('.');
                    let name = split.next().unwrap_or_default().to_string();
                    let fields = split
                        .map(|segment| mlld_ast::FieldSeg::Key(segment.to_string()))
                        .collect();
                    TemplatePart::Interp(VarRef { name, fields })
                }
            })
            .collect(),
        syntax: TemplateSyntax::AtSign,
    }
}

// ---------------------------------------------------------------------------
// Scripted runner
// ---------------------------------------------------------------------------

/// A deterministic stand-in for the JS runner. The "source" is a small
/// command string:
///
/// - `sleep:<ms>;return:<json>` — sleep, then return the JSON value
/// - `upper:<param>` / `lower:<param>` — case-fold a text parameter
/// - `double:<param>` — multiply a numeric parameter by two
/// - `jitterdouble:<param>` — like `double`, with a delay inversely
///   proportional to the value so completion order scrambles
pub struct ScriptedRunner;

fn param<'a>(request: &'a RunRequest, name: &str) -> Value {
    request
        .params
        .iter()
        .find(|(param_name, _)| param_name == name)
        .map(|(_, value)| value.clone())
        .unwrap_or_default()
}

#[async_trait]
impl CodeRunner for ScriptedRunner {
    fn lang(&self) -> Lang {
        Lang::Js
    }

    async fn run(&self, request: RunRequest) -> MlldResult<RunOutput> {
        let mut value = Value::Null;
        for command in request.source.split(';') {
            let (op, arg) = command.split_once(':').unwrap_or((command, ""));
            match op.trim() {
                "sleep" => {
                    let ms: u64 = arg.trim().parse().unwrap_or(0);
                    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                }
                "return" => {
                    let json: serde_json::Value = serde_json::from_str(arg.trim())
                        .map_err(|err| MlldError::internal(err.to_string()))?;
                    value = Value::from_json(json);
                }
                "upper" => {
                    value = Value::Text(param(&request, arg.trim()).to_text().to_uppercase());
                }
                "lower" => {
                    value = Value::Text(param(&request, arg.trim()).to_text().to_lowercase());
                }
                "double" => {
                    let input = param(&request, arg.trim()).to_text().parse().unwrap_or(0.0);
                    value = Value::Number(input * 2.0);
                }
                "jitterdouble" => {
                    let input: f64 =
                        param(&request, arg.trim()).to_text().parse().unwrap_or(0.0);
                    let delay = ((8.0 - input).max(0.0) * 15.0) as u64;
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    value = Value::Number(input * 2.0);
                }
                "" => {}
                other => {
                    return Err(MlldError::internal(format!(
                        "scripted runner: unknown op {other}"
                    )));
                }
            }
        }
        Ok(RunOutput {
            value,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// A scripted JS body.
pub fn js(source: &str) -> ExeBody {
    ExeBody::Language {
        lang: Lang::Js,
        source: source.into(),
    }
}

// ---------------------------------------------------------------------------
// Mock MCP host
// ---------------------------------------------------------------------------

/// Answers every tool invocation with a fixed value.
pub struct FixedMcpHost(pub serde_json::Value);

#[async_trait]
impl McpHost for FixedMcpHost {
    async fn invoke(
        &self,
        _tool: &str,
        _args: Vec<serde_json::Value>,
    ) -> MlldResult<serde_json::Value> {
        Ok(self.0.clone())
    }
}
