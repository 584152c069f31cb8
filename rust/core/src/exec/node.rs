//! The Node runner: an isolated VM context inside a `node` child process.
//!
//! The body and parameters cross through environment variables to avoid
//! shell quoting; the result crosses back as JSON behind a sentinel on
//! stdout, leaving the body free to print.

use async_trait::async_trait;

use mlld_ast::Lang;

use crate::error::MlldResult;
use crate::value::Value;

use super::shell::spawn_capture;
use super::{CodeRunner, RunOutput, RunRequest};

pub(crate) const RESULT_SENTINEL: &str = "__MLLD_RESULT__";

const NODE_HARNESS: &str = r#"
const vm = require('node:vm');
const params = JSON.parse(process.env.MLLD_PARAMS || '{}');
const source = process.env.MLLD_SOURCE || '';
const sandbox = Object.assign({ console, JSON, Buffer, setTimeout, clearTimeout, require, process }, params);
const context = vm.createContext(sandbox);
const result = vm.runInContext('(function(){\n' + source + '\n})()', context);
Promise.resolve(result).then((value) => {
  process.stdout.write('\n__MLLD_RESULT__' + JSON.stringify(value === undefined ? null : value));
}).catch((err) => {
  process.stderr.write(String(err && err.stack || err));
  process.exit(1);
});
"#;

pub struct NodeRunner;

impl Default for NodeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CodeRunner for NodeRunner {
    fn lang(&self) -> Lang {
        Lang::Node
    }

    async fn run(&self, request: RunRequest) -> MlldResult<RunOutput> {
        let mut source = String::new();
        for func in &request.shadow {
            source.push_str(&format!(
                "function {}({}) {{\n{}\n}}\n",
                func.name,
                func.params.join(", "),
                func.source
            ));
        }
        source.push_str(&request.source);

        let params = serde_json::to_string(&serde_json::Value::Object(
            request
                .params
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        ))?;

        let mut command = tokio::process::Command::new("node");
        command
            .arg("-e")
            .arg(NODE_HARNESS)
            .env("MLLD_SOURCE", &source)
            .env("MLLD_PARAMS", &params)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let (stdout, stderr) =
            spawn_capture(command, "node block", &request.cancel, request.timeout_ms).await?;

        let (printed, result) = split_sentinel(&stdout);
        Ok(RunOutput {
            value: result,
            stdout: printed,
            stderr,
        })
    }
}

/// Split captured stdout into body prints and the sentinel-framed result.
pub(crate) fn split_sentinel(stdout: &str) -> (String, Value) {
    match stdout.rfind(RESULT_SENTINEL) {
        Some(position) => {
            let printed = stdout[..position].trim_end_matches('\n').to_string();
            let json_text = &stdout[position + RESULT_SENTINEL.len()..];
            let value = serde_json::from_str(json_text.trim())
                .map(Value::from_json)
                .unwrap_or_else(|_| Value::Text(json_text.trim().to_string()));
            (printed, value)
        }
        None => (
            stdout.trim_end_matches('\n').to_string(),
            Value::Text(stdout.trim_end_matches('\n').to_string()),
        ),
    }
}
