//! Shell runners: `sh` and `bash` child processes.
//!
//! Parameters cross as environment variables; shadow callables are
//! emitted as shell function definitions ahead of the body. Nonzero exit
//! surfaces as a command failure carrying both captured streams.

use async_trait::async_trait;

use mlld_ast::Lang;

use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::scheduler::{run_bounded, CancelToken};
use crate::value::Value;

use super::{CodeRunner, RunOutput, RunRequest};

pub struct ShellRunner {
    lang: Lang,
}

impl ShellRunner {
    #[must_use]
    pub fn new(lang: Lang) -> Self {
        Self { lang }
    }

    fn binary(&self) -> &'static str {
        match self.lang {
            Lang::Bash => "bash",
            _ => "sh",
        }
    }
}

#[async_trait]
impl CodeRunner for ShellRunner {
    fn lang(&self) -> Lang {
        self.lang
    }

    async fn run(&self, request: RunRequest) -> MlldResult<RunOutput> {
        let mut script = String::new();
        for func in &request.shadow {
            script.push_str(&format!("{}() {{\n{}\n}}\n", func.name, func.source));
        }
        script.push_str(&request.source);

        let mut command = tokio::process::Command::new(self.binary());
        command
            .arg("-c")
            .arg(&script)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in &request.params {
            command.env(name, value.to_text());
        }

        let (stdout, stderr) = spawn_capture(
            command,
            &request.source,
            &request.cancel,
            request.timeout_ms,
        )
        .await?;

        Ok(RunOutput {
            value: Value::Text(stdout.trim_end_matches('\n').to_string()),
            stdout,
            stderr,
        })
    }
}

/// Spawn a prepared command, capture both streams, and convert nonzero
/// exits into command failures. Cancellation kills the child via
/// `kill_on_drop`.
pub(crate) async fn spawn_capture(
    mut command: tokio::process::Command,
    label: &str,
    cancel: &CancelToken,
    timeout_ms: Option<u64>,
) -> MlldResult<(String, String)> {
    let label = label.to_string();
    let future = async move {
        let child = command.spawn()?;
        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(MlldError::new(ErrorKind::CommandFailed {
                command: label,
                status: output.status.code(),
                stdout,
                stderr,
            }));
        }
        Ok((stdout, stderr))
    };
    run_bounded(future, cancel, timeout_ms).await
}
