use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Print `value` as JSON/YAML, or the `human` rendering
    pub fn emit<T, F>(self, value: &T, human: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce(&T) -> String,
    {
        let rendered = match self {
            OutputFormat::Human => human(value),
            OutputFormat::Json => serde_json::to_string_pretty(value)?,
            OutputFormat::Yaml => serde_yaml::to_string(value)?,
        };
        println!("{}", rendered.trim_end());
        Ok(())
    }
}
