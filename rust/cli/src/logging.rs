//! Logging setup.

use clap::ValueEnum;
use eyre::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

/// A `tracing` log level.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LoggingLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LoggingLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Setup logging to stderr.
///
/// `level` applies to this crate and the core; `filter` passes through to
/// the env-filter for other crates.
pub fn setup(level: LoggingLevel, filter: &str) -> Result<()> {
    let directives = format!(
        "{}{}{}",
        level.as_str(),
        if filter.is_empty() { "" } else { "," },
        filter
    );
    let filter_layer = EnvFilter::builder()
        .parse(&directives)
        .wrap_err_with(|| format!("Unable to parse logging filter: {directives}"))?;

    registry()
        .with(filter_layer)
        .with(tracing_error::ErrorLayer::default())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
