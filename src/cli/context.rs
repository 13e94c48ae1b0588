use std::path::{Path, PathBuf};

use selector_healer::{HealingConfig, LoadedConfig, PartialHealingConfig};

use super::output::OutputFormat;

pub struct CliContext {
    config: HealingConfig,
    config_path: Option<PathBuf>,
    file_layer: PartialHealingConfig,
    env_layer: PartialHealingConfig,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(loaded: LoadedConfig, output: OutputFormat) -> Self {
        Self {
            config: loaded.config,
            config_path: loaded.path,
            file_layer: loaded.file_layer,
            env_layer: loaded.env_layer,
            output,
        }
    }

    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    /// Config file that contributed to [`Self::config`], if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn file_layer(&self) -> &PartialHealingConfig {
        &self.file_layer
    }

    pub fn env_layer(&self) -> &PartialHealingConfig {
        &self.env_layer
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }
}
