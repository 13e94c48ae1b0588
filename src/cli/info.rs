use anyhow::Result;
use selector_healer::StrategyKind;
use serde::Serialize;

use crate::cli::context::CliContext;

#[derive(Debug, Serialize)]
struct SystemInfo {
    version: &'static str,
    build_date: &'static str,
    git_commit: &'static str,
    config_file: Option<String>,
    enabled: bool,
    strategies: Vec<StrategyInfo>,
}

#[derive(Debug, Serialize)]
struct StrategyInfo {
    name: &'static str,
    base_priority: u32,
    configured: bool,
}

pub fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    let info = SystemInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_date: option_env!("BUILD_DATE").unwrap_or("unknown"),
        git_commit: option_env!("GIT_HASH").unwrap_or("unknown"),
        config_file: ctx.config_path().map(|path| path.display().to_string()),
        enabled: config.enabled,
        strategies: StrategyKind::ALL
            .iter()
            .map(|kind| StrategyInfo {
                name: kind.name(),
                base_priority: kind.base_priority(),
                configured: config.strategies.contains(kind),
            })
            .collect(),
    };

    ctx.output().emit(&info, |info| {
        let mut lines = vec![
            "SelfHeal System Information".to_string(),
            "===========================".to_string(),
            format!("Version: {}", info.version),
            format!("Build Date: {}", info.build_date),
            format!("Git Commit: {}", info.git_commit),
            String::new(),
            "Configuration:".to_string(),
            format!(
                "- Config File: {}",
                info.config_file.as_deref().unwrap_or("(none, defaults + environment)")
            ),
            format!("- Healing Enabled: {}", info.enabled),
            String::new(),
            "Strategies (base priority):".to_string(),
        ];
        for strategy in &info.strategies {
            lines.push(format!(
                "- {} ({}){}",
                strategy.name,
                strategy.base_priority,
                if strategy.configured { "" } else { " [disabled]" }
            ));
        }
        lines.join("\n")
    })
}
