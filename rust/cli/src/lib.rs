//! The `mlld` command line front-end.
//!
//! The grammar is an external collaborator: this binary consumes a
//! JSON-serialized document (see `mlld-ast`), evaluates it with a
//! streaming effect sink, and maps evaluation errors to exit codes.

pub mod logging;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};

use mlld_ast::Document;
use mlld_core::effects::{BufferedSink, EffectSink, StreamingSink};
use mlld_core::env::{Environment, EvalConfig};
use mlld_core::error::MlldError;
use mlld_core::security_manager::{DenyAllPrompt, SecurityManager};

/// Evaluate an mlld document and render its output.
#[derive(Debug, Parser)]
#[command(name = "mlld", version, about)]
pub struct Cli {
    /// Path to a JSON-serialized document.
    pub input: PathBuf,

    /// Evaluate with strict field access: unknown fields error instead of
    /// resolving to null.
    #[arg(long)]
    pub strict: bool,

    /// Collect the document and print it once at the end instead of
    /// streaming.
    #[arg(long)]
    pub buffered: bool,

    /// Cap on simultaneous parallel operations.
    #[arg(long, default_value_t = 4)]
    pub parallel_limit: usize,

    /// Project root for path containment checks.
    #[arg(long, default_value = ".")]
    pub project_root: PathBuf,

    /// Permit absolute paths outside the project root.
    #[arg(long)]
    pub allow_absolute: bool,

    /// Approval lock file; when absent, unapproved operations are denied.
    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Environment variable names importable via `@input`.
    #[arg(long = "allow-env", value_name = "NAME")]
    pub allow_env: Vec<String>,

    /// The minimum log level.
    #[arg(long, default_value = "warn")]
    pub log_level: logging::LoggingLevel,

    /// Log filter for other crates.
    #[arg(long, default_value = "")]
    pub log_filter: String,
}

impl Cli {
    /// Run the evaluation and return the process exit code.
    ///
    /// # Errors
    ///
    /// IO and parse failures surface as `eyre` errors; evaluation errors
    /// are printed with location and trace and mapped to an exit code.
    pub async fn run(&self) -> Result<i32> {
        let source = std::fs::read_to_string(&self.input)
            .wrap_err_with(|| format!("Unable to read {}", self.input.display()))?;
        let document: Document = serde_json::from_str(&source)
            .wrap_err_with(|| format!("Unable to parse {}", self.input.display()))?;

        let sink: Arc<dyn EffectSink> = if self.buffered {
            Arc::new(BufferedSink::new())
        } else {
            Arc::new(StreamingSink::new(true))
        };

        let mut env_vars = indexmap::IndexMap::new();
        for name in &self.allow_env {
            if let Ok(value) = std::env::var(name) {
                env_vars.insert(name.clone(), value);
            }
        }

        let config = EvalConfig {
            parallel_limit: self.parallel_limit.max(1),
            strict_fields: self.strict,
            project_root: self.project_root.clone(),
            allow_absolute_paths: self.allow_absolute,
            env_allowlist: self.allow_env.clone(),
            env_vars,
            ..EvalConfig::default()
        };

        let security = match &self.lock_file {
            Some(path) => Arc::new(
                SecurityManager::with_lock_file(
                    self.project_root.clone(),
                    path.clone(),
                    Box::new(DenyAllPrompt),
                )
                .map_err(|err| eyre::eyre!(err.to_string()))?
                .allow_absolute_paths(self.allow_absolute),
            ),
            None => Arc::new(
                SecurityManager::permissive(self.project_root.clone())
                    .allow_absolute_paths(self.allow_absolute),
            ),
        };

        let env = Environment::builder()
            .sink(Arc::clone(&sink))
            .security(security)
            .config(config)
            .file_path(self.input.clone())
            .build();

        match mlld_core::evaluate_document(&document, &env).await {
            Ok(outcome) => {
                if self.buffered {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(outcome.document.as_bytes())?;
                }
                Ok(0)
            }
            Err(err) => {
                report(&err, sink.stderr())?;
                Ok(err.exit_code())
            }
        }
    }
}

/// Print an evaluation error: location, message, the directive trace
/// innermost-first, and any stderr collected before the failure.
fn report(err: &MlldError, collected_stderr: String) -> Result<()> {
    let mut stderr = std::io::stderr().lock();
    match &err.location {
        Some(location) => writeln!(stderr, "error[{}] at {location}: {err}", err.code())?,
        None => writeln!(stderr, "error[{}]: {err}", err.code())?,
    }
    for frame in &err.trace {
        writeln!(stderr, "  in {frame}")?;
    }
    if !collected_stderr.is_empty() {
        writeln!(stderr, "--- collected stderr ---")?;
        writeln!(stderr, "{}", collected_stderr.trim_end())?;
    }
    Ok(())
}
