//! Healing configuration
//!
//! A [`HealingConfig`] is resolved once from four layers, later layers
//! winning field by field:
//!
//! 1. [`HealingConfig::default`]
//! 2. a config file (`healing.config.json`, `healing.config.yaml`, ...)
//! 3. `HEALING_*` / `OLLAMA_*` environment variables
//! 4. a programmatic override
//!
//! File keys are camelCase. The legacy keys `cacheHealing`, `ollama.url`,
//! `ollama.timeout` and `retry.initialBackoff` are accepted as aliases.

use crate::{errors::ConfigError, types::StrategyKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Config files probed by [`PartialHealingConfig::discover`], in order
pub const CONFIG_FILE_NAMES: &[&str] = &[
    "healing.config.json",
    "healing.config.yaml",
    "healing.config.yml",
    ".healingrc.json",
    ".healingrc.yaml",
];

/// Environment variables understood by [`PartialHealingConfig::from_env_map`]
pub const ENV_VAR_REFERENCE: &[(&str, &str)] = &[
    ("HEALING_ENABLED", "Enable/disable healing (true/false)"),
    ("HEALING_STRATEGIES", "Comma-separated list of strategies"),
    ("HEALING_MAX_ATTEMPTS", "Maximum healing attempts (number)"),
    ("HEALING_CACHE_ENABLED", "Enable selector caching (true/false)"),
    ("OLLAMA_URL", "Ollama API URL"),
    ("OLLAMA_MODEL", "Ollama model name"),
    ("OLLAMA_TIMEOUT", "Ollama request timeout (ms)"),
    ("HEALING_RETRY_ON_TIMEOUT", "Retry on timeout errors (true/false)"),
    ("HEALING_RETRY_ON_FLAKINESS", "Retry on flaky selectors (true/false)"),
    ("HEALING_MAX_RETRIES", "Maximum retry attempts (number)"),
    ("HEALING_INITIAL_BACKOFF", "Initial backoff time (ms)"),
    ("HEALING_TELEMETRY_ENABLED", "Enable telemetry (true/false)"),
    ("HEALING_LOG_LEVEL", "Log level (debug/info/warn/error)"),
];

/// Telemetry verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiBackendConfig {
    #[serde(alias = "url")]
    pub endpoint: String,
    pub model: String,
    #[serde(alias = "timeout")]
    pub timeout_ms: u64,
}

impl Default for AiBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl AiBackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub on_timeout: bool,
    pub on_flakiness: bool,
    pub max_retries: u32,
    #[serde(alias = "initialBackoff")]
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            on_timeout: true,
            on_flakiness: true,
            max_retries: 2,
            initial_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub log_level: LogLevel,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: LogLevel::Info,
        }
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingConfig {
    pub enabled: bool,
    /// Strategies to instantiate; run order is decided per selector
    pub strategies: Vec<StrategyKind>,
    pub max_attempts: u32,
    #[serde(alias = "cacheHealing")]
    pub cache_enabled: bool,
    #[serde(alias = "ollama")]
    pub ai_backend: AiBackendConfig,
    pub retry: RetryConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategies: StrategyKind::ALL.to_vec(),
            max_attempts: 3,
            cache_enabled: true,
            ai_backend: AiBackendConfig::default(),
            retry: RetryConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl HealingConfig {
    /// Overlay every field present in `partial`
    pub fn apply(&mut self, partial: &PartialHealingConfig) {
        if let Some(enabled) = partial.enabled {
            self.enabled = enabled;
        }
        if let Some(strategies) = &partial.strategies {
            self.strategies = strategies.clone();
        }
        if let Some(max_attempts) = partial.max_attempts {
            self.max_attempts = max_attempts;
        }
        if let Some(cache_enabled) = partial.cache_enabled {
            self.cache_enabled = cache_enabled;
        }
        if let Some(ai) = &partial.ai_backend {
            if let Some(endpoint) = &ai.endpoint {
                self.ai_backend.endpoint = endpoint.clone();
            }
            if let Some(model) = &ai.model {
                self.ai_backend.model = model.clone();
            }
            if let Some(timeout_ms) = ai.timeout_ms {
                self.ai_backend.timeout_ms = timeout_ms;
            }
        }
        if let Some(retry) = &partial.retry {
            retry.apply_to(&mut self.retry);
        }
        if let Some(telemetry) = &partial.telemetry {
            if let Some(enabled) = telemetry.enabled {
                self.telemetry.enabled = enabled;
            }
            if let Some(level) = telemetry.log_level {
                self.telemetry.log_level = level;
            }
        }
    }

    /// Check value ranges, reporting every problem at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.strategies.is_empty() {
            errors.push("at least one strategy must be enabled".to_string());
        }
        for (idx, kind) in self.strategies.iter().enumerate() {
            if self.strategies[..idx].contains(kind) {
                errors.push(format!("strategy {} listed more than once", kind));
            }
        }
        if !(1..=10).contains(&self.max_attempts) {
            errors.push("maxAttempts must be between 1 and 10".to_string());
        }
        if !self.ai_backend.endpoint.starts_with("http://")
            && !self.ai_backend.endpoint.starts_with("https://")
        {
            errors.push("AI backend endpoint must start with http:// or https://".to_string());
        }
        if self.ai_backend.model.trim().is_empty() {
            errors.push("AI backend model must not be empty".to_string());
        }
        if !(1_000..=120_000).contains(&self.ai_backend.timeout_ms) {
            errors.push("AI backend timeout must be between 1000ms and 120000ms".to_string());
        }
        if self.retry.max_retries > 10 {
            errors.push("maxRetries must be between 0 and 10".to_string());
        }
        if !(100..=10_000).contains(&self.retry.initial_backoff_ms) {
            errors.push("initialBackoff must be between 100ms and 10000ms".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialAiBackendConfig {
    #[serde(alias = "url", skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialRetryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_timeout: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_flakiness: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(alias = "initialBackoff", skip_serializing_if = "Option::is_none")]
    pub initial_backoff_ms: Option<u64>,
}

impl PartialRetryConfig {
    pub fn apply_to(&self, retry: &mut RetryConfig) {
        if let Some(on_timeout) = self.on_timeout {
            retry.on_timeout = on_timeout;
        }
        if let Some(on_flakiness) = self.on_flakiness {
            retry.on_flakiness = on_flakiness;
        }
        if let Some(max_retries) = self.max_retries {
            retry.max_retries = max_retries;
        }
        if let Some(initial_backoff_ms) = self.initial_backoff_ms {
            retry.initial_backoff_ms = initial_backoff_ms;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialTelemetryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
}

/// One configuration layer; absent fields leave lower layers untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialHealingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategies: Option<Vec<StrategyKind>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(alias = "cacheHealing", skip_serializing_if = "Option::is_none")]
    pub cache_enabled: Option<bool>,
    #[serde(alias = "ollama", skip_serializing_if = "Option::is_none")]
    pub ai_backend: Option<PartialAiBackendConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<PartialRetryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<PartialTelemetryConfig>,
}

fn env_bool(value: &str) -> bool {
    value == "true"
}

fn env_number(name: &str, value: &str, min: i64) -> Option<i64> {
    match value.trim().parse::<i64>() {
        Ok(number) if number >= min => Some(number),
        _ => {
            warn!(var = name, value = value, "ignoring invalid numeric environment value");
            None
        }
    }
}

impl PartialHealingConfig {
    /// Layer built from environment variables (see [`ENV_VAR_REFERENCE`])
    pub fn from_env_map(vars: &HashMap<String, String>) -> Self {
        let get = |name: &str| vars.get(name).map(String::as_str);
        let mut config = PartialHealingConfig::default();

        if let Some(value) = get("HEALING_ENABLED") {
            config.enabled = Some(env_bool(value));
        }
        if let Some(value) = get("HEALING_STRATEGIES").filter(|v| !v.trim().is_empty()) {
            let mut strategies = Vec::new();
            for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                match name.parse::<StrategyKind>() {
                    Ok(kind) => strategies.push(kind),
                    Err(err) => warn!("Skipping strategy from HEALING_STRATEGIES: {}", err),
                }
            }
            if strategies.is_empty() {
                warn!("HEALING_STRATEGIES named no known strategy; ignoring it");
            } else {
                config.strategies = Some(strategies);
            }
        }
        if let Some(value) = get("HEALING_MAX_ATTEMPTS") {
            config.max_attempts =
                env_number("HEALING_MAX_ATTEMPTS", value, 1).and_then(|n| u32::try_from(n).ok());
        }
        if let Some(value) = get("HEALING_CACHE_ENABLED") {
            config.cache_enabled = Some(env_bool(value));
        }

        let mut ai = PartialAiBackendConfig::default();
        if let Some(value) = get("OLLAMA_URL").filter(|v| !v.is_empty()) {
            ai.endpoint = Some(value.to_string());
        }
        if let Some(value) = get("OLLAMA_MODEL").filter(|v| !v.is_empty()) {
            ai.model = Some(value.to_string());
        }
        if let Some(value) = get("OLLAMA_TIMEOUT") {
            ai.timeout_ms = env_number("OLLAMA_TIMEOUT", value, 1).map(|n| n as u64);
        }
        if ai != PartialAiBackendConfig::default() {
            config.ai_backend = Some(ai);
        }

        let mut retry = PartialRetryConfig::default();
        if let Some(value) = get("HEALING_RETRY_ON_TIMEOUT") {
            retry.on_timeout = Some(env_bool(value));
        }
        if let Some(value) = get("HEALING_RETRY_ON_FLAKINESS") {
            retry.on_flakiness = Some(env_bool(value));
        }
        if let Some(value) = get("HEALING_MAX_RETRIES") {
            retry.max_retries =
                env_number("HEALING_MAX_RETRIES", value, 0).and_then(|n| u32::try_from(n).ok());
        }
        if let Some(value) = get("HEALING_INITIAL_BACKOFF") {
            retry.initial_backoff_ms =
                env_number("HEALING_INITIAL_BACKOFF", value, 1).map(|n| n as u64);
        }
        if retry != PartialRetryConfig::default() {
            config.retry = Some(retry);
        }

        let mut telemetry = PartialTelemetryConfig::default();
        if let Some(value) = get("HEALING_TELEMETRY_ENABLED") {
            telemetry.enabled = Some(env_bool(value));
        }
        if let Some(value) = get("HEALING_LOG_LEVEL") {
            match value.parse::<LogLevel>() {
                Ok(level) => telemetry.log_level = Some(level),
                Err(err) => warn!("Ignoring HEALING_LOG_LEVEL: {}", err),
            }
        }
        if telemetry != PartialTelemetryConfig::default() {
            config.telemetry = Some(telemetry);
        }

        config
    }

    pub fn from_process_env() -> Self {
        Self::from_env_map(&std::env::vars().collect())
    }

    /// Parse a JSON or YAML config file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        if !matches!(format.as_deref(), Some("json" | "yaml" | "yml")) {
            return Err(ConfigError::UnsupportedFormat(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded healing config from {}", path.display());

        if format.as_deref() == Some("json") {
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })
        } else if content.trim().is_empty() {
            Ok(Self::default())
        } else {
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    /// First known config file present in `dir`
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

/// Merge the configuration layers; `Default < File < Environment < Override`
pub fn resolve(
    defaults: HealingConfig,
    file: &PartialHealingConfig,
    env: &PartialHealingConfig,
    overrides: &PartialHealingConfig,
) -> HealingConfig {
    let mut config = defaults;
    config.apply(file);
    config.apply(env);
    config.apply(overrides);
    config
}

/// Load the file layer.
///
/// An explicit path must load. A discovered file that fails to parse is
/// skipped with a warning, like a missing one.
pub fn load_file_layer(
    explicit: Option<&Path>,
    search_dir: &Path,
) -> Result<(PartialHealingConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = explicit {
        info!("Loading healing configuration from {}", path.display());
        return Ok((PartialHealingConfig::from_file(path)?, Some(path.to_path_buf())));
    }

    match PartialHealingConfig::discover(search_dir) {
        Some(path) => match PartialHealingConfig::from_file(&path) {
            Ok(layer) => {
                info!("Loading healing configuration from {}", path.display());
                Ok((layer, Some(path)))
            }
            Err(err) => {
                warn!("Ignoring config file: {}", err);
                Ok((PartialHealingConfig::default(), None))
            }
        },
        None => Ok((PartialHealingConfig::default(), None)),
    }
}

/// Resolved configuration plus the layers it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HealingConfig,
    /// File the file layer was read from, if any
    pub path: Option<PathBuf>,
    pub file_layer: PartialHealingConfig,
    pub env_layer: PartialHealingConfig,
}

/// Resolve defaults, the file layer and the process environment, looking for
/// a config file in the working directory unless `explicit` is given
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    load_config_from(explicit, &cwd, PartialHealingConfig::from_process_env())
}

/// [`load_config`] with the search directory and environment layer injected
pub fn load_config_from(
    explicit: Option<&Path>,
    search_dir: &Path,
    env_layer: PartialHealingConfig,
) -> Result<LoadedConfig, ConfigError> {
    let (file_layer, path) = load_file_layer(explicit, search_dir)?;
    let config = resolve(
        HealingConfig::default(),
        &file_layer,
        &env_layer,
        &PartialHealingConfig::default(),
    );
    debug!("Resolved healing configuration: {:?}", config);
    Ok(LoadedConfig {
        config,
        path,
        file_layer,
        env_layer,
    })
}

/// Default configuration as pretty JSON, suitable for `healing.config.json`
pub fn sample_config_json() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&HealingConfig::default())
}

/// Default configuration as YAML
pub fn sample_config_yaml() -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&HealingConfig::default())
}
