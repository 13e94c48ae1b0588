//! Healing engine
//!
//! Orchestrates one heal call:
//! 1. disabled -> immediate failure (`strategy = "none"`)
//! 2. cache hit within TTL -> cached success
//! 3. healthy, applicable strategies in priority order until one succeeds
//! 4. nothing worked -> `strategy = "all-failed"`
//!
//! All state sits behind `parking_lot` locks that are released before any
//! `.await`, so an engine can be shared as `Arc<HealingEngine>`.

use crate::{
    config::{HealingConfig, PartialHealingConfig},
    strategies::{HealingStrategy, SelectorHealer},
    types::{now_ms, CacheEntry, FlakinessRecord, HealingResult, HealingStats, StrategyKind},
};
use dom_adapter::DomCapability;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a healed selector is reused without re-running strategies
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

const ALL_FAILED: &str = "all-failed";
const DISABLED: &str = "none";

/// A strategy instance and whether it may run
#[derive(Debug, Clone)]
pub struct StrategySlot {
    pub strategy: Arc<HealingStrategy>,
    pub healthy: bool,
}

pub struct HealingEngine {
    config: RwLock<HealingConfig>,
    slots: RwLock<Vec<StrategySlot>>,
    /// Parent of every AI strategy's token; replaced on rebuild
    cancel: Mutex<CancellationToken>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    flakiness: RwLock<HashMap<String, FlakinessRecord>>,
    stats: RwLock<HealingStats>,
    cache_ttl: Duration,
}

impl std::fmt::Debug for HealingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealingEngine")
            .field("config", &*self.config.read())
            .field("cache_entries", &self.cache.read().len())
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

fn build_slots(config: &HealingConfig, cancel: &CancellationToken) -> Vec<StrategySlot> {
    config
        .strategies
        .iter()
        .map(|kind| StrategySlot {
            strategy: Arc::new(HealingStrategy::from_kind(*kind, config, cancel)),
            healthy: true,
        })
        .collect()
}

impl HealingEngine {
    pub fn new(config: HealingConfig) -> Self {
        Self::with_cache_ttl(config, DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_ttl(config: HealingConfig, cache_ttl: Duration) -> Self {
        let cancel = CancellationToken::new();
        let slots = build_slots(&config, &cancel);
        info!(
            "Healing engine ready with strategies: {}",
            config
                .strategies
                .iter()
                .map(|kind| kind.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self {
            config: RwLock::new(config),
            slots: RwLock::new(slots),
            cancel: Mutex::new(cancel),
            cache: RwLock::new(HashMap::new()),
            flakiness: RwLock::new(HashMap::new()),
            stats: RwLock::new(HealingStats::default()),
            cache_ttl,
        }
    }

    /// Find a working replacement for `selector`
    pub async fn heal(&self, dom: &dyn DomCapability, selector: &str) -> HealingResult {
        let (enabled, cache_enabled) = {
            let config = self.config.read();
            (config.enabled, config.cache_enabled)
        };
        if !enabled {
            debug!(selector = %selector, "healing disabled");
            return HealingResult::failed(selector, DISABLED, "Healing is disabled");
        }

        let started = Instant::now();
        self.stats.write().total_attempts += 1;

        if cache_enabled {
            if let Some(result) = self.cached(selector) {
                info!(selector = %selector, healed = %result.selector, "using cached heal");
                return result;
            }
        }

        for slot in self.plan(selector) {
            let kind = slot.strategy.kind();
            if !slot.healthy {
                warn!(strategy = %kind, "skipping unhealthy strategy");
                continue;
            }
            if !slot.strategy.is_applicable(selector) {
                debug!(strategy = %kind, selector = %selector, "strategy not applicable");
                continue;
            }

            debug!(strategy = %kind, selector = %selector, "trying strategy");
            match slot.strategy.heal(dom, selector).await {
                Ok(result) => {
                    *self
                        .stats
                        .write()
                        .strategy_usage
                        .entry(kind.name().to_string())
                        .or_insert(0) += 1;
                    if !result.success {
                        debug!(strategy = %kind, "strategy failed: {}", result.reasoning);
                        continue;
                    }

                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    self.stats
                        .write()
                        .record_success(result.confidence, elapsed_ms);
                    if cache_enabled {
                        self.store(selector, &result, kind);
                    }
                    self.record_success(selector);
                    info!(
                        strategy = %kind,
                        "healed {} -> {} ({:.1}%)",
                        selector,
                        result.selector,
                        result.confidence
                    );
                    return result;
                }
                Err(err) => {
                    warn!(strategy = %kind, "strategy errored, marking unhealthy: {}", err);
                    self.mark_unhealthy(&slot.strategy);
                }
            }
        }

        self.stats.write().failed_heals += 1;
        self.record_failure(selector);
        warn!(selector = %selector, "all healing strategies failed");
        HealingResult::failed(
            selector,
            ALL_FAILED,
            "All healing strategies were unable to find a working alternative",
        )
    }

    /// Strategies in the order they would run for `selector`, highest
    /// situational priority first; ties keep configured order
    pub fn strategy_order(&self, selector: &str) -> Vec<StrategyKind> {
        self.plan(selector)
            .iter()
            .map(|slot| slot.strategy.kind())
            .collect()
    }

    fn plan(&self, selector: &str) -> Vec<StrategySlot> {
        let mut slots = self.slots.read().clone();
        slots.sort_by_key(|slot| std::cmp::Reverse(slot.strategy.kind().priority_for(selector)));
        slots
    }

    fn mark_unhealthy(&self, strategy: &Arc<HealingStrategy>) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots
            .iter_mut()
            .find(|slot| Arc::ptr_eq(&slot.strategy, strategy))
        {
            slot.healthy = false;
        }
    }

    fn cached(&self, selector: &str) -> Option<HealingResult> {
        let mut cache = self.cache.write();
        let entry = cache.get_mut(selector)?;
        let age_ms = now_ms().saturating_sub(entry.created_at_ms);
        if age_ms > self.cache_ttl.as_millis() as i64 {
            debug!(selector = %selector, "cache entry expired");
            cache.remove(selector);
            return None;
        }

        entry.use_count += 1;
        let result = HealingResult::healed(
            entry.healed_selector.clone(),
            entry.confidence,
            format!("{} (cached)", entry.strategy),
            format!("Retrieved from cache (used {} times)", entry.use_count),
        );
        drop(cache);
        self.stats.write().cache_hits += 1;
        Some(result)
    }

    fn store(&self, selector: &str, result: &HealingResult, kind: StrategyKind) {
        self.cache.write().insert(
            selector.to_string(),
            CacheEntry {
                original_selector: selector.to_string(),
                healed_selector: result.selector.clone(),
                confidence: result.confidence,
                strategy: kind,
                created_at_ms: now_ms(),
                use_count: 1,
            },
        );
    }

    fn observe(&self, selector: &str, success: bool) {
        let mut records = self.flakiness.write();
        let record = records
            .entry(selector.to_string())
            .or_insert_with(|| FlakinessRecord::new(selector));
        let was_flaky = record.is_flaky;
        record.observe(success, now_ms());
        if record.is_flaky && !was_flaky {
            warn!(
                selector = %selector,
                "selector became flaky ({:.0}% failures over {} attempts)",
                record.failure_rate() * 100.0,
                record.total()
            );
        }
    }

    /// Count a successful use of `selector`
    pub fn record_success(&self, selector: &str) {
        self.observe(selector, true);
    }

    /// Count a failed use of `selector`
    pub fn record_failure(&self, selector: &str) {
        self.observe(selector, false);
    }

    pub fn is_flaky(&self, selector: &str) -> bool {
        self.flakiness
            .read()
            .get(selector)
            .is_some_and(|record| record.is_flaky)
    }

    pub fn flakiness_record(&self, selector: &str) -> Option<FlakinessRecord> {
        self.flakiness.read().get(selector).cloned()
    }

    pub fn cache_entry(&self, selector: &str) -> Option<CacheEntry> {
        self.cache.read().get(selector).cloned()
    }

    /// Probe every strategy and record the outcome as its health
    pub async fn run_health_checks(&self, dom: &dyn DomCapability) -> BTreeMap<String, bool> {
        let slots = self.slots.read().clone();
        let mut results = BTreeMap::new();
        for slot in slots {
            let healthy = slot.strategy.health_check(dom).await;
            if !healthy {
                warn!(strategy = %slot.strategy.kind(), "health check failed");
            }
            if let Some(current) = self
                .slots
                .write()
                .iter_mut()
                .find(|current| Arc::ptr_eq(&current.strategy, &slot.strategy))
            {
                current.healthy = healthy;
            }
            results.insert(slot.strategy.name().to_string(), healthy);
        }
        results
    }

    /// Strategy kinds with their current health, in configured order
    pub fn strategy_health(&self) -> Vec<(StrategyKind, bool)> {
        self.slots
            .read()
            .iter()
            .map(|slot| (slot.strategy.kind(), slot.healthy))
            .collect()
    }

    pub fn stats(&self) -> HealingStats {
        self.stats.read().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.write() = HealingStats::default();
    }

    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    pub fn clear_flakiness_records(&self) {
        self.flakiness.write().clear();
    }

    pub fn config(&self) -> HealingConfig {
        self.config.read().clone()
    }

    /// Merge `partial` into the configuration.
    ///
    /// Changing the strategy list or the AI backend rebuilds every strategy
    /// (health reset to healthy) and cancels in-flight AI requests.
    pub fn update_config(&self, partial: &PartialHealingConfig) {
        let (rebuild, config) = {
            let mut config = self.config.write();
            let before = config.clone();
            config.apply(partial);
            let rebuild = before.strategies != config.strategies
                || before.ai_backend != config.ai_backend;
            (rebuild, config.clone())
        };
        if !rebuild {
            return;
        }

        let cancel = CancellationToken::new();
        let slots = build_slots(&config, &cancel);
        let previous = std::mem::replace(&mut *self.cancel.lock(), cancel);
        previous.cancel();
        *self.slots.write() = slots;
        info!("Healing strategies rebuilt after configuration change");
    }
}

impl Drop for HealingEngine {
    fn drop(&mut self) {
        self.cancel.get_mut().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dom_adapter::{NodeSpec, StaticDom};

    fn offline_config(strategies: Vec<StrategyKind>) -> HealingConfig {
        HealingConfig {
            strategies,
            ..HealingConfig::default()
        }
    }

    fn checkout_page() -> StaticDom {
        StaticDom::with_body(vec![NodeSpec::new("div").class("actions").child(
            NodeSpec::new("button")
                .attr("data-testid", "checkoutBtn")
                .text("Checkout"),
        )])
    }

    #[tokio::test]
    async fn disabled_engine_does_not_count() {
        let engine = HealingEngine::new(HealingConfig {
            enabled: false,
            ..HealingConfig::default()
        });
        let result = engine.heal(&checkout_page(), "#missing").await;
        assert!(!result.success);
        assert_eq!(result.strategy, "none");
        assert_eq!(result.reasoning, "Healing is disabled");
        assert_eq!(engine.stats().total_attempts, 0);
    }

    #[tokio::test]
    async fn success_is_cached_and_counted() {
        let engine = HealingEngine::new(offline_config(vec![StrategyKind::DataTestIdRecovery]));
        let dom = checkout_page();
        let selector = r#"[data-testid="checkout-btn"]"#;

        let first = engine.heal(&dom, selector).await;
        assert!(first.success);
        assert_eq!(first.strategy, "data-testid-recovery");

        let second = engine.heal(&dom, selector).await;
        assert!(second.success);
        assert_eq!(second.selector, first.selector);
        assert_eq!(second.strategy, "data-testid-recovery (cached)");
        assert_eq!(second.reasoning, "Retrieved from cache (used 2 times)");

        let stats = engine.stats();
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.successful_heals, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.strategy_usage.get("data-testid-recovery"), Some(&1));
        assert_eq!(engine.cache_entry(selector).unwrap().use_count, 2);
        assert_eq!(engine.flakiness_record(selector).unwrap().success_count, 1);
    }

    #[tokio::test]
    async fn cache_can_be_disabled() {
        let engine = HealingEngine::new(HealingConfig {
            cache_enabled: false,
            strategies: vec![StrategyKind::DataTestIdRecovery],
            ..HealingConfig::default()
        });
        let dom = checkout_page();
        let selector = r#"[data-testid="checkout-btn"]"#;
        engine.heal(&dom, selector).await;
        let again = engine.heal(&dom, selector).await;
        assert_eq!(again.strategy, "data-testid-recovery");
        assert!(engine.cache_entry(selector).is_none());
    }

    #[test]
    fn situational_priority_reorders_strategies() {
        let engine = HealingEngine::new(offline_config(vec![
            StrategyKind::CssHierarchyAnalysis,
            StrategyKind::TextContentMatching,
            StrategyKind::DataTestIdRecovery,
        ]));
        assert_eq!(
            engine.strategy_order(r#"[data-testid="x"]"#),
            vec![
                StrategyKind::DataTestIdRecovery,
                StrategyKind::TextContentMatching,
                StrategyKind::CssHierarchyAnalysis,
            ]
        );
        assert_eq!(
            engine.strategy_order("text=Buy")[0],
            StrategyKind::TextContentMatching
        );
    }

    #[tokio::test]
    async fn erroring_strategy_is_demoted() {
        let engine = HealingEngine::new(offline_config(vec![StrategyKind::DataTestIdRecovery]));
        let dom = checkout_page();
        dom.set_detached(true);

        let result = engine.heal(&dom, r#"[data-testid="checkout-btn"]"#).await;
        assert_eq!(result.strategy, "all-failed");
        assert_eq!(
            engine.strategy_health(),
            vec![(StrategyKind::DataTestIdRecovery, false)]
        );
        assert!(engine.stats().strategy_usage.is_empty());

        dom.set_detached(false);
        let result = engine.heal(&dom, r#"[data-testid="checkout-btn"]"#).await;
        assert!(!result.success);

        engine.update_config(&PartialHealingConfig {
            strategies: Some(vec![
                StrategyKind::DataTestIdRecovery,
                StrategyKind::CssHierarchyAnalysis,
            ]),
            ..Default::default()
        });
        assert!(engine.strategy_health().iter().all(|(_, healthy)| *healthy));
        let result = engine.heal(&dom, r#"[data-testid="checkout-btn"]"#).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn health_checks_update_slots() {
        let engine = HealingEngine::new(offline_config(vec![
            StrategyKind::TextContentMatching,
            StrategyKind::CssHierarchyAnalysis,
        ]));
        let dom = checkout_page();
        let report = engine.run_health_checks(&dom).await;
        assert_eq!(report.get("text-content-matching"), Some(&true));
        assert_eq!(report.get("css-hierarchy-analysis"), Some(&true));

        dom.set_detached(true);
        let report = engine.run_health_checks(&dom).await;
        assert!(report.values().all(|healthy| !healthy));
        assert!(engine.strategy_health().iter().all(|(_, healthy)| !healthy));
    }

    #[test]
    fn non_structural_changes_keep_strategies() {
        let engine = HealingEngine::new(offline_config(vec![StrategyKind::CssHierarchyAnalysis]));
        let before = engine.slots.read()[0].strategy.clone();
        engine.update_config(&PartialHealingConfig {
            max_attempts: Some(5),
            ..Default::default()
        });
        assert!(Arc::ptr_eq(&before, &engine.slots.read()[0].strategy));
        assert_eq!(engine.config().max_attempts, 5);
    }

    #[test]
    fn ai_backend_change_cancels_previous_token() {
        let engine = HealingEngine::new(HealingConfig::default());
        let old = engine.cancel.lock().clone();
        engine.update_config(&PartialHealingConfig {
            ai_backend: Some(crate::config::PartialAiBackendConfig {
                model: Some("mistral".into()),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(old.is_cancelled());
        assert!(!engine.cancel.lock().is_cancelled());
    }
}
