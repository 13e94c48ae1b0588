//! Core types for selector healing

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Ranked replacement candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub selector: String,
    pub confidence: f64,
}

impl Alternative {
    pub fn new(selector: impl Into<String>, confidence: f64) -> Self {
        Self {
            selector: selector.into(),
            confidence,
        }
    }
}

/// Outcome of one healing attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingResult {
    pub success: bool,
    /// Healed selector on success, the original selector otherwise
    pub selector: String,
    /// 0..=100
    pub confidence: f64,
    pub strategy: String,
    pub reasoning: String,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    pub timestamp_ms: i64,
}

impl HealingResult {
    pub fn healed(
        selector: impl Into<String>,
        confidence: f64,
        strategy: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            selector: selector.into(),
            confidence: confidence.clamp(0.0, 100.0),
            strategy: strategy.into(),
            reasoning: reasoning.into(),
            alternatives: Vec::new(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn failed(
        original_selector: impl Into<String>,
        strategy: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            selector: original_selector.into(),
            confidence: 0.0,
            strategy: strategy.into(),
            reasoning: reasoning.into(),
            alternatives: Vec::new(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<Alternative>) -> Self {
        self.alternatives = alternatives;
        self
    }
}

/// The closed set of healing strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[serde(rename = "data-testid-recovery")]
    DataTestIdRecovery,
    TextContentMatching,
    CssHierarchyAnalysis,
    AiPoweredAnalysis,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::DataTestIdRecovery,
        StrategyKind::TextContentMatching,
        StrategyKind::CssHierarchyAnalysis,
        StrategyKind::AiPoweredAnalysis,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::DataTestIdRecovery => "data-testid-recovery",
            StrategyKind::TextContentMatching => "text-content-matching",
            StrategyKind::CssHierarchyAnalysis => "css-hierarchy-analysis",
            StrategyKind::AiPoweredAnalysis => "ai-powered-analysis",
        }
    }

    pub fn base_priority(&self) -> u32 {
        match self {
            StrategyKind::DataTestIdRecovery => 100,
            StrategyKind::TextContentMatching => 80,
            StrategyKind::CssHierarchyAnalysis => 60,
            StrategyKind::AiPoweredAnalysis => 40,
        }
    }

    /// Priority for a particular selector; test-id and text selectors pull
    /// their specialised strategy to the front.
    pub fn priority_for(&self, selector: &str) -> u32 {
        match self {
            StrategyKind::DataTestIdRecovery
                if selector.contains("data-testid") || selector.contains("data-test") =>
            {
                150
            }
            StrategyKind::TextContentMatching
                if selector.contains("text=") || selector.contains("has-text") =>
            {
                140
            }
            other => other.base_priority(),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown strategy: {}", wanted))
    }
}

/// Cached substitution keyed by the original selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub original_selector: String,
    pub healed_selector: String,
    pub confidence: f64,
    pub strategy: StrategyKind,
    pub created_at_ms: i64,
    pub use_count: u64,
}

/// Minimum observations before a selector can be judged flaky
pub const FLAKY_MIN_ATTEMPTS: u64 = 5;

/// Success/failure history of one selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlakinessRecord {
    pub selector: String,
    pub failure_count: u64,
    pub success_count: u64,
    pub last_failure_at_ms: Option<i64>,
    pub is_flaky: bool,
}

impl FlakinessRecord {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            failure_count: 0,
            success_count: 0,
            last_failure_at_ms: None,
            is_flaky: false,
        }
    }

    pub fn total(&self) -> u64 {
        self.failure_count + self.success_count
    }

    pub fn failure_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.failure_count as f64 / total as f64,
        }
    }

    /// Record one observation and recompute `is_flaky`.
    ///
    /// Intermittent failure (strictly between 30% and 70%) is flaky; a
    /// selector failing almost always is broken instead.
    pub fn observe(&mut self, success: bool, at_ms: i64) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
            self.last_failure_at_ms = Some(at_ms);
        }
        let rate = self.failure_rate();
        self.is_flaky = self.total() >= FLAKY_MIN_ATTEMPTS && rate > 0.3 && rate < 0.7;
    }
}

/// Running counters kept by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealingStats {
    pub total_attempts: u64,
    pub successful_heals: u64,
    pub failed_heals: u64,
    pub cache_hits: u64,
    pub strategy_usage: BTreeMap<String, u64>,
    pub average_confidence: f64,
    pub average_heal_time_ms: f64,
}

impl HealingStats {
    /// Percentage of heal calls that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        self.successful_heals as f64 / self.total_attempts as f64 * 100.0
    }

    /// Fold one successful strategy heal into the running means
    pub(crate) fn record_success(&mut self, confidence: f64, elapsed_ms: f64) {
        self.successful_heals += 1;
        let n = self.successful_heals as f64;
        self.average_confidence = (self.average_confidence * (n - 1.0) + confidence) / n;
        self.average_heal_time_ms = (self.average_heal_time_ms * (n - 1.0) + elapsed_ms) / n;
    }

    /// Multi-line report printed at the end of a test run
    pub fn summary(&self) -> String {
        let mut lines = vec![
            "Healing statistics".to_string(),
            format!("  Total healing attempts: {}", self.total_attempts),
            format!("  Successful heals: {}", self.successful_heals),
            format!("  Failed heals: {}", self.failed_heals),
            format!("  Cache hits: {}", self.cache_hits),
            format!("  Success rate: {:.1}%", self.success_rate()),
        ];
        if self.successful_heals > 0 {
            lines.push(format!(
                "  Average confidence: {:.1}%",
                self.average_confidence
            ));
            lines.push(format!(
                "  Average heal time: {:.0}ms",
                self.average_heal_time_ms
            ));
        }
        if !self.strategy_usage.is_empty() {
            lines.push("  Strategy usage:".to_string());
            for (strategy, count) in &self.strategy_usage {
                lines.push(format!("    - {}: {} times", strategy, count));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(successes: u64, failures: u64) -> FlakinessRecord {
        let mut record = FlakinessRecord::new("#x");
        for _ in 0..successes {
            record.observe(true, 1);
        }
        for _ in 0..failures {
            record.observe(false, 2);
        }
        record
    }

    #[test]
    fn flakiness_thresholds() {
        assert!(!record_with(2, 2).is_flaky);
        assert!(record_with(6, 4).is_flaky);
        assert!(!record_with(1, 9).is_flaky);
        assert!(!record_with(10, 0).is_flaky);
        assert!(!record_with(7, 3).is_flaky);
        assert_eq!(record_with(1, 1).last_failure_at_ms, Some(2));
    }

    #[test]
    fn strategy_names_round_trip() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.name().parse::<StrategyKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
        assert!("magic".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn situational_priorities() {
        let testid = "[data-testid=\"x\"]";
        assert_eq!(StrategyKind::DataTestIdRecovery.priority_for(testid), 150);
        assert_eq!(StrategyKind::TextContentMatching.priority_for(testid), 80);
        assert_eq!(
            StrategyKind::TextContentMatching.priority_for("button:has-text(\"Go\")"),
            140
        );
        assert_eq!(StrategyKind::AiPoweredAnalysis.priority_for("#a"), 40);
    }

    #[test]
    fn healed_confidence_is_clamped() {
        let result = HealingResult::healed("#a", 130.0, "css-hierarchy-analysis", "ok");
        assert_eq!(result.confidence, 100.0);
        assert!(result.success);
    }

    #[test]
    fn running_means_are_incremental() {
        let mut stats = HealingStats::default();
        stats.record_success(90.0, 10.0);
        stats.record_success(70.0, 30.0);
        assert_eq!(stats.average_confidence, 80.0);
        assert_eq!(stats.average_heal_time_ms, 20.0);
        stats.total_attempts = 4;
        assert_eq!(stats.success_rate(), 50.0);
        assert!(stats.summary().contains("Success rate: 50.0%"));
    }
}
