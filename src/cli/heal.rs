use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use dom_adapter::{PageSpec, StaticDom};
use selector_healer::{HealingEngine, HealingResult, StrategyKind};
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct HealArgs {
    /// Page fixture (JSON or YAML `PageSpec`)
    #[arg(long, value_name = "FILE")]
    pub page: PathBuf,

    /// Selector that no longer matches
    #[arg(long)]
    pub selector: String,

    /// Leave out ai-powered-analysis
    #[arg(long)]
    pub no_ai: bool,

    /// Run strategy health checks before healing
    #[arg(long)]
    pub health: bool,
}

#[derive(Debug, Serialize)]
struct HealReport {
    page: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    health: Option<BTreeMap<String, bool>>,
    result: HealingResult,
}

impl HealReport {
    fn render(&self) -> String {
        let mut lines = Vec::new();
        if let Some(health) = &self.health {
            lines.push("Strategy health:".to_string());
            for (name, healthy) in health {
                lines.push(format!("- {}: {}", name, if *healthy { "healthy" } else { "unhealthy" }));
            }
        }
        let result = &self.result;
        if result.success {
            lines.push(format!(
                "Healed -> {} ({:.1}% via {})",
                result.selector, result.confidence, result.strategy
            ));
        } else {
            lines.push(format!("Not healed ({})", result.strategy));
        }
        lines.push(format!("Reasoning: {}", result.reasoning));
        if !result.alternatives.is_empty() {
            lines.push("Alternatives:".to_string());
            for alternative in &result.alternatives {
                lines.push(format!(
                    "- {} ({:.1}%)",
                    alternative.selector, alternative.confidence
                ));
            }
        }
        lines.join("\n")
    }
}

/// Read a page fixture; `.yaml`/`.yml` parse as YAML, everything else JSON
pub async fn load_page(path: &Path) -> Result<StaticDom> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let spec: PageSpec = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => {
            serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        _ => serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?,
    };
    Ok(StaticDom::from_spec(spec))
}

pub async fn cmd_heal(args: HealArgs, ctx: &CliContext) -> Result<()> {
    let dom = load_page(&args.page).await?;

    let mut config = ctx.config().clone();
    if args.no_ai {
        config
            .strategies
            .retain(|kind| *kind != StrategyKind::AiPoweredAnalysis);
    }
    if config.strategies.is_empty() {
        bail!("no healing strategies left to run");
    }

    let engine = HealingEngine::new(config);
    let health = if args.health {
        Some(engine.run_health_checks(&dom).await)
    } else {
        None
    };

    info!("Healing {} against {}", args.selector, args.page.display());
    let result = engine.heal(&dom, &args.selector).await;
    let report = HealReport {
        page: args.page.display().to_string(),
        health,
        result,
    };
    ctx.output().emit(&report, HealReport::render)?;

    if !report.result.success {
        bail!("could not heal selector {}", args.selector);
    }
    Ok(())
}
