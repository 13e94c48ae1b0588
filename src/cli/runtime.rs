use std::path::Path;

use anyhow::{anyhow, Context, Result};
use selector_healer::{LoadedConfig, LogLevel, TelemetryConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for the subscriber.
///
/// `--debug` wins, then `--log-level`; otherwise telemetry decides, with
/// disabled telemetry silencing everything.
pub fn log_directive(telemetry: &TelemetryConfig, level: Option<&str>, debug: bool) -> Result<String> {
    if debug {
        return Ok(LogLevel::Debug.as_str().to_string());
    }
    if let Some(level) = level {
        let level: LogLevel = level
            .parse()
            .map_err(|err: String| anyhow!(err))
            .context("Invalid log level")?;
        return Ok(level.as_str().to_string());
    }
    if !telemetry.enabled {
        return Ok("off".to_string());
    }
    Ok(telemetry.log_level.as_str().to_string())
}

/// Install the global subscriber; logs go to stderr so stdout stays parseable
pub fn init_logging(telemetry: &TelemetryConfig, level: Option<&str>, debug: bool) -> Result<()> {
    let directive = log_directive(telemetry, level, debug)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Resolve the configuration for this invocation
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    selector_healer::load_config(explicit).context("Failed to load healing configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_precedence() {
        let telemetry = TelemetryConfig::default();
        assert_eq!(log_directive(&telemetry, None, false).unwrap(), "info");
        assert_eq!(log_directive(&telemetry, Some("WARN"), false).unwrap(), "warn");
        assert_eq!(log_directive(&telemetry, Some("warn"), true).unwrap(), "debug");
        assert!(log_directive(&telemetry, Some("loud"), false).is_err());

        let silent = TelemetryConfig {
            enabled: false,
            ..TelemetryConfig::default()
        };
        assert_eq!(log_directive(&silent, None, false).unwrap(), "off");
    }
}
