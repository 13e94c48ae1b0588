use std::env;
use std::path::{Path, PathBuf};

use crate::cli::context::CliContext;
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use selector_healer::{sample_config_json, sample_config_yaml, ConfigError, ENV_VAR_REFERENCE};
use serde::Serialize;
use tokio::fs;
use tracing::info;

const DEFAULT_CONFIG_FILE: &str = "healing.config.json";

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the resolved configuration
    Show,

    /// Validate the resolved configuration
    Validate,

    /// Write a sample configuration file
    Init {
        /// Destination; `.yaml`/`.yml` writes YAML, anything else JSON
        #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List the supported environment variables
    Env,
}

#[derive(Serialize)]
struct ValidationReport {
    valid: bool,
    source: Option<String>,
    errors: Vec<String>,
}

#[derive(Serialize)]
struct EnvVar {
    name: &'static str,
    description: &'static str,
    value: Option<String>,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let source = describe_source(ctx.config_path());
            ctx.output().emit(ctx.config(), |config| {
                format!(
                    "Resolved configuration ({}):\n{}",
                    source,
                    serde_yaml::to_string(config).unwrap_or_default()
                )
            })?;
        }
        ConfigAction::Validate => {
            let errors = match ctx.config().validate() {
                Ok(()) => Vec::new(),
                Err(ConfigError::Invalid(errors)) => errors,
                Err(other) => vec![other.to_string()],
            };
            let report = ValidationReport {
                valid: errors.is_empty(),
                source: ctx.config_path().map(|path| path.display().to_string()),
                errors,
            };
            ctx.output().emit(&report, |report| {
                if report.valid {
                    "Configuration is valid".to_string()
                } else {
                    let mut lines = vec!["Configuration is invalid:".to_string()];
                    lines.extend(report.errors.iter().map(|err| format!("- {}", err)));
                    lines.join("\n")
                }
            })?;
            if !report.valid {
                bail!("configuration has {} problem(s)", report.errors.len());
            }
        }
        ConfigAction::Init { path, force } => {
            write_sample(&path, force).await?;
            println!("Wrote sample configuration to {}", path.display());
        }
        ConfigAction::Env => {
            let vars: Vec<EnvVar> = ENV_VAR_REFERENCE
                .iter()
                .map(|&(name, description)| EnvVar {
                    name,
                    description,
                    value: env::var(name).ok(),
                })
                .collect();
            ctx.output().emit(&vars, |vars| {
                vars.iter()
                    .map(|var| match &var.value {
                        Some(value) => format!("{:<28} {} (set: {})", var.name, var.description, value),
                        None => format!("{:<28} {}", var.name, var.description),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
    }

    Ok(())
}

fn describe_source(path: Option<&Path>) -> String {
    match path {
        Some(path) => format!("file {} + environment", path.display()),
        None => "defaults + environment".to_string(),
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    )
}

async fn write_sample(path: &Path, force: bool) -> Result<()> {
    if !force && fs::try_exists(path).await? {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    let sample = if is_yaml(path) {
        sample_config_yaml()?
    } else {
        sample_config_json()?
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, sample)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote sample configuration to {}", path.display());
    Ok(())
}
