//! The Python runner: a `python3` child process.

use async_trait::async_trait;

use mlld_ast::Lang;

use crate::error::MlldResult;

use super::node::split_sentinel;
use super::shell::spawn_capture;
use super::{CodeRunner, RunOutput, RunRequest};

pub struct PythonRunner;

impl Default for PythonRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PythonRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn indent(source: &str) -> String {
    source
        .lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl CodeRunner for PythonRunner {
    fn lang(&self) -> Lang {
        Lang::Python
    }

    async fn run(&self, request: RunRequest) -> MlldResult<RunOutput> {
        let mut script = String::from("import json, os, sys\n");
        script.push_str("globals().update(json.loads(os.environ.get(\"MLLD_PARAMS\", \"{}\")))\n");

        for func in &request.shadow {
            script.push_str(&format!(
                "def {}({}):\n{}\n",
                func.name,
                func.params.join(", "),
                indent(&func.source)
            ));
        }

        script.push_str(&format!(
            "def __mlld_main():\n{}\n",
            indent(&request.source)
        ));
        script.push_str(
            "__r = __mlld_main()\n\
             sys.stdout.write(\"\\n__MLLD_RESULT__\" + json.dumps(__r))\n",
        );

        let params = serde_json::to_string(&serde_json::Value::Object(
            request
                .params
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        ))?;

        let mut command = tokio::process::Command::new("python3");
        command
            .arg("-c")
            .arg(&script)
            .env("MLLD_PARAMS", &params)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let (stdout, stderr) =
            spawn_capture(command, "python block", &request.cancel, request.timeout_ms).await?;

        let (printed, value) = split_sentinel(&stdout);
        Ok(RunOutput {
            value,
            stdout: printed,
            stderr,
        })
    }
}
