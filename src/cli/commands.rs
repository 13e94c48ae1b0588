use clap::Subcommand;

use super::config::ConfigArgs;
use super::doctor::DoctorArgs;
use super::heal::HealArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Inspect, validate or generate healing configuration
    Config(ConfigArgs),

    /// Check that the AI backend is reachable and has the configured model
    Doctor(DoctorArgs),

    /// Heal a selector against a page fixture
    Heal(HealArgs),

    /// Show version and build information
    Info,
}
