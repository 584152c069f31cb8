//! The in-process JS runner.
//!
//! Runs on a QuickJS runtime with a restricted global surface: no module
//! loading, no host access beyond the marshalled parameters and shadow
//! functions. Bodies return via `return`; `console.log` output is
//! captured and surfaced as stdout. Results cross back as JSON produced
//! inside the evaluator, so no foreign-value conversion is needed.

use async_trait::async_trait;

use mlld_ast::Lang;

use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::scheduler::run_bounded;
use crate::value::Value;

use super::{CodeRunner, RunOutput, RunRequest};

pub struct JsRunner;

impl Default for JsRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl JsRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CodeRunner for JsRunner {
    fn lang(&self) -> Lang {
        Lang::Js
    }

    async fn run(&self, request: RunRequest) -> MlldResult<RunOutput> {
        let script = compose_script(&request)?;
        let cancel = request.cancel.clone();
        let timeout_ms = request.timeout_ms;

        let future = async move {
            tokio::task::spawn_blocking(move || eval_script(&script))
                .await
                .map_err(|err| MlldError::internal(format!("js evaluation task failed: {err}")))?
        };
        run_bounded(future, &cancel, timeout_ms).await
    }
}

fn compose_script(request: &RunRequest) -> MlldResult<String> {
    let mut script = String::from(
        "(function(){\n\
         const __logs = [];\n\
         const console = {\n\
           log: (...a) => { __logs.push(a.map(String).join(' ')); },\n\
           error: (...a) => { __logs.push(a.map(String).join(' ')); },\n\
         };\n",
    );

    for (name, value) in &request.params {
        let json = serde_json::to_string(&value.to_json())?;
        script.push_str(&format!("const {name} = {json};\n"));
    }
    for func in &request.shadow {
        script.push_str(&format!(
            "function {}({}) {{\n{}\n}}\n",
            func.name,
            func.params.join(", "),
            func.source
        ));
    }

    script.push_str(&format!(
        "const __result = (function() {{\n{}\n}})();\n",
        request.source
    ));
    script.push_str(
        "try {\n\
           return JSON.stringify({ result: __result === undefined ? null : __result, logs: __logs });\n\
         } catch (_e) {\n\
           return JSON.stringify({ result: String(__result), logs: __logs });\n\
         }\n\
         })()",
    );
    Ok(script)
}

#[derive(serde::Deserialize)]
struct JsEnvelope {
    result: serde_json::Value,
    logs: Vec<String>,
}

fn eval_script(script: &str) -> MlldResult<RunOutput> {
    let runtime = rquickjs::Runtime::new()
        .map_err(|err| MlldError::internal(format!("quickjs runtime: {err}")))?;
    let context = rquickjs::Context::full(&runtime)
        .map_err(|err| MlldError::internal(format!("quickjs context: {err}")))?;

    let envelope_json = context.with(|ctx| -> MlldResult<String> {
        match ctx.eval::<String, _>(script.as_bytes()) {
            Ok(out) => Ok(out),
            Err(rquickjs::Error::Exception) => {
                let thrown = ctx.catch();
                let message = thrown
                    .as_exception()
                    .and_then(rquickjs::Exception::message)
                    .unwrap_or_else(|| format!("{thrown:?}"));
                Err(MlldError::new(ErrorKind::CommandFailed {
                    command: "js block".into(),
                    status: None,
                    stdout: String::new(),
                    stderr: message,
                }))
            }
            Err(err) => Err(MlldError::new(ErrorKind::CommandFailed {
                command: "js block".into(),
                status: None,
                stdout: String::new(),
                stderr: err.to_string(),
            })),
        }
    })?;

    let envelope: JsEnvelope = serde_json::from_str(&envelope_json)?;
    let stdout = if envelope.logs.is_empty() {
        String::new()
    } else {
        format!("{}\n", envelope.logs.join("\n"))
    };
    Ok(RunOutput {
        value: Value::from_json(envelope.result),
        stdout,
        stderr: String::new(),
    })
}
