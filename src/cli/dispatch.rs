use super::config::cmd_config;
use super::doctor::cmd_doctor;
use super::env::CliArgs;
use super::heal::cmd_heal;
use super::info::cmd_info;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Config(args) => cmd_config(args, ctx).await,
        Commands::Doctor(args) => cmd_doctor(args, ctx).await,
        Commands::Heal(args) => cmd_heal(args, ctx).await,
        Commands::Info => cmd_info(ctx),
    }
}
