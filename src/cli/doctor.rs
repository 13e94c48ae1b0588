use anyhow::{bail, Result};
use clap::Args;
use selector_healer::{AiBackendError, OllamaClient, StrategyKind};
use serde::Serialize;
use tracing::warn;

use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct DoctorArgs {
    /// Probe this endpoint instead of the configured one
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Probe this model instead of the configured one
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    endpoint: String,
    model: String,
    reachable: bool,
    model_available: bool,
    installed_models: Vec<String>,
    ai_strategy_enabled: bool,
    error: Option<String>,
}

impl DoctorReport {
    fn healthy(&self) -> bool {
        self.reachable && self.model_available
    }

    fn render(&self) -> String {
        let mark = |ok: bool| if ok { "ok" } else { "FAILED" };
        let mut lines = vec![
            "AI backend check".to_string(),
            format!("- Endpoint: {}", self.endpoint),
            format!("- Model: {}", self.model),
            format!("- Reachable: {}", mark(self.reachable)),
            format!("- Model installed: {}", mark(self.model_available)),
        ];
        if !self.installed_models.is_empty() {
            lines.push(format!("- Installed models: {}", self.installed_models.join(", ")));
        }
        if !self.ai_strategy_enabled {
            lines.push("- Note: ai-powered-analysis is not in the strategy list".to_string());
        }
        if let Some(err) = &self.error {
            lines.push(format!("- Error: {}", err));
        }
        lines.join("\n")
    }
}

pub async fn cmd_doctor(args: DoctorArgs, ctx: &CliContext) -> Result<()> {
    let mut backend = ctx.config().ai_backend.clone();
    if let Some(endpoint) = args.endpoint {
        backend.endpoint = endpoint;
    }
    if let Some(model) = args.model {
        backend.model = model;
    }
    let client = OllamaClient::new(&backend);

    let mut report = DoctorReport {
        endpoint: client.endpoint().to_string(),
        model: client.model().to_string(),
        reachable: false,
        model_available: false,
        installed_models: Vec::new(),
        ai_strategy_enabled: ctx
            .config()
            .strategies
            .contains(&StrategyKind::AiPoweredAnalysis),
        error: None,
    };

    match client.list_models().await {
        Ok(models) => {
            report.reachable = true;
            report.installed_models = models;
            match client.ensure_model().await {
                Ok(()) => report.model_available = true,
                Err(err @ AiBackendError::ModelMissing { .. }) => {
                    report.error = Some(format!("{}; run `ollama pull {}`", err, client.model()))
                }
                Err(err) => report.error = Some(err.to_string()),
            }
        }
        Err(err) => {
            warn!("AI backend probe failed: {}", err);
            report.error = Some(err.to_string());
        }
    }

    ctx.output().emit(&report, DoctorReport::render)?;
    if !report.healthy() {
        bail!("AI backend at {} is not ready", report.endpoint);
    }
    Ok(())
}
