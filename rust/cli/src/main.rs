use clap::Parser;
use eyre::Result;

use mlld_cli::{logging, Cli};

/// Main entry function
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::setup(cli.log_level, &cli.log_filter)?;

    let code = cli.run().await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
