use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config};

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let loaded = load_config(cli.config.as_deref())?;
    init_logging(&loaded.config.telemetry, cli.log_level.as_deref(), cli.debug)?;

    debug!("Starting selfheal v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &loaded.path {
        debug!("Configuration file: {}", path.display());
    }
    let cli_context = CliContext::new(loaded, cli.output);

    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            debug!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
