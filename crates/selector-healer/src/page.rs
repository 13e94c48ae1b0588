//! Healing page facade
//!
//! Wraps a [`PageDriver`] so every element operation:
//! 1. runs against the selector the test asked for
//! 2. on failure, resolves a healed selector (local map, then the engine)
//! 3. reruns against the healed selector when it differs
//!
//! If healing cannot produce a different selector the original error is
//! returned untouched. The whole sequence runs inside the [`RetryHandler`].

use crate::{
    engine::HealingEngine,
    retry::RetryHandler,
    types::HealingStats,
};
use dom_adapter::{DomError, ElementOp, OpOutput, PageDriver};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct HealingPage<P: PageDriver> {
    driver: P,
    engine: Arc<HealingEngine>,
    retry: RetryHandler,
    /// Re-read the retry policy from the engine before each operation
    follow_engine_retry: bool,
    healed: RwLock<HashMap<String, String>>,
    heal_failures: Mutex<HashMap<String, u32>>,
}

impl<P: PageDriver> HealingPage<P> {
    /// Facade whose retry policy tracks the engine's configuration,
    /// including later [`HealingEngine::update_config`] calls
    pub fn new(driver: P, engine: Arc<HealingEngine>) -> Self {
        let retry = RetryHandler::new(Some(engine.clone()), engine.config().retry);
        Self {
            follow_engine_retry: true,
            ..Self::with_retry(driver, engine, retry)
        }
    }

    /// Facade with its own retry handler; engine retry settings are ignored
    pub fn with_retry(driver: P, engine: Arc<HealingEngine>, retry: RetryHandler) -> Self {
        Self {
            driver,
            engine,
            retry,
            follow_engine_retry: false,
            healed: RwLock::new(HashMap::new()),
            heal_failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn driver(&self) -> &P {
        &self.driver
    }

    pub fn engine(&self) -> &Arc<HealingEngine> {
        &self.engine
    }

    pub fn retry_handler(&self) -> &RetryHandler {
        &self.retry
    }

    pub fn healing_stats(&self) -> HealingStats {
        self.engine.stats()
    }

    /// Log the engine statistics; meant for the end of a test run
    pub fn report_stats(&self) -> HealingStats {
        let stats = self.engine.stats();
        if stats.total_attempts > 0 {
            info!("{}", stats.summary());
        }
        stats
    }

    /// Forget healed selectors and heal budgets of this facade
    pub fn clear_selector_cache(&self) {
        self.healed.write().clear();
        self.heal_failures.lock().clear();
    }

    /// Healed replacement previously resolved for `selector`
    pub fn healed_selector(&self, selector: &str) -> Option<String> {
        self.healed.read().get(selector).cloned()
    }

    async fn run(&self, selector: &str, op: ElementOp) -> Result<OpOutput, DomError> {
        if self.follow_engine_retry {
            let current = self.engine.config().retry;
            if current != self.retry.config() {
                debug!("Retry policy changed on the engine, applying");
                self.retry.set_config(current);
            }
        }
        self.retry
            .execute(Some(selector), || self.attempt(selector, &op))
            .await
    }

    async fn attempt(&self, selector: &str, op: &ElementOp) -> Result<OpOutput, DomError> {
        let original_err = match self.driver.perform(selector, op).await {
            Ok(output) => return Ok(output),
            Err(err) => err,
        };
        debug!(selector = %selector, op = %op, "operation failed: {}", original_err);

        let healed = self.resolve(selector).await;
        if healed == selector {
            return Err(original_err);
        }
        info!(selector = %selector, healed = %healed, op = %op, "retrying with healed selector");
        self.driver.perform(&healed, op).await
    }

    /// Selector to use in place of `selector`; the original when nothing
    /// better is known
    async fn resolve(&self, selector: &str) -> String {
        if let Some(healed) = self.healed_selector(selector) {
            return healed;
        }

        match self.driver.count(selector).await {
            Ok(count) if count > 0 => return selector.to_string(),
            Ok(_) => {}
            Err(err) => debug!(selector = %selector, "original selector query failed: {}", err),
        }

        let max_attempts = self.engine.config().max_attempts;
        let failures = self
            .heal_failures
            .lock()
            .get(selector)
            .copied()
            .unwrap_or(0);
        if failures >= max_attempts {
            debug!(selector = %selector, "heal budget of {} exhausted", max_attempts);
            return selector.to_string();
        }

        let result = self.engine.heal(&self.driver, selector).await;
        if result.success {
            self.healed
                .write()
                .insert(selector.to_string(), result.selector.clone());
            return result.selector;
        }

        *self
            .heal_failures
            .lock()
            .entry(selector.to_string())
            .or_insert(0) += 1;
        warn!(selector = %selector, "could not heal: {}", result.reasoning);
        selector.to_string()
    }

    pub async fn click(&self, selector: &str) -> Result<(), DomError> {
        self.run(selector, ElementOp::Click).await.map(|_| ())
    }

    pub async fn fill(&self, selector: &str, value: &str) -> Result<(), DomError> {
        self.run(selector, ElementOp::Fill(value.to_string()))
            .await
            .map(|_| ())
    }

    pub async fn type_text(&self, selector: &str, text: &str) -> Result<(), DomError> {
        self.run(selector, ElementOp::Type(text.to_string()))
            .await
            .map(|_| ())
    }

    pub async fn press(&self, selector: &str, key: &str) -> Result<(), DomError> {
        self.run(selector, ElementOp::Press(key.to_string()))
            .await
            .map(|_| ())
    }

    pub async fn check(&self, selector: &str) -> Result<(), DomError> {
        self.run(selector, ElementOp::Check).await.map(|_| ())
    }

    pub async fn uncheck(&self, selector: &str) -> Result<(), DomError> {
        self.run(selector, ElementOp::Uncheck).await.map(|_| ())
    }

    /// Select by option value or label
    pub async fn select_option(&self, selector: &str, option: &str) -> Result<(), DomError> {
        self.run(selector, ElementOp::SelectOption(option.to_string()))
            .await
            .map(|_| ())
    }

    pub async fn hover(&self, selector: &str) -> Result<(), DomError> {
        self.run(selector, ElementOp::Hover).await.map(|_| ())
    }

    pub async fn focus(&self, selector: &str) -> Result<(), DomError> {
        self.run(selector, ElementOp::Focus).await.map(|_| ())
    }

    pub async fn blur(&self, selector: &str) -> Result<(), DomError> {
        self.run(selector, ElementOp::Blur).await.map(|_| ())
    }

    pub async fn clear(&self, selector: &str) -> Result<(), DomError> {
        self.run(selector, ElementOp::Clear).await.map(|_| ())
    }

    pub async fn is_visible(&self, selector: &str) -> Result<bool, DomError> {
        self.run_bool(selector, ElementOp::IsVisible).await
    }

    pub async fn is_hidden(&self, selector: &str) -> Result<bool, DomError> {
        self.run_bool(selector, ElementOp::IsHidden).await
    }

    pub async fn is_enabled(&self, selector: &str) -> Result<bool, DomError> {
        self.run_bool(selector, ElementOp::IsEnabled).await
    }

    pub async fn is_disabled(&self, selector: &str) -> Result<bool, DomError> {
        self.run_bool(selector, ElementOp::IsDisabled).await
    }

    pub async fn text_content(&self, selector: &str) -> Result<Option<String>, DomError> {
        Ok(self.run(selector, ElementOp::TextContent).await?.into_text())
    }

    pub async fn inner_text(&self, selector: &str) -> Result<String, DomError> {
        Ok(self
            .run(selector, ElementOp::InnerText)
            .await?
            .into_text()
            .unwrap_or_default())
    }

    pub async fn inner_html(&self, selector: &str) -> Result<String, DomError> {
        Ok(self
            .run(selector, ElementOp::InnerHtml)
            .await?
            .into_text()
            .unwrap_or_default())
    }

    pub async fn get_attribute(
        &self,
        selector: &str,
        name: &str,
    ) -> Result<Option<String>, DomError> {
        Ok(self
            .run(selector, ElementOp::GetAttribute(name.to_string()))
            .await?
            .into_text())
    }

    pub async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), DomError> {
        self.run(selector, ElementOp::WaitForSelector { timeout })
            .await
            .map(|_| ())
    }

    async fn run_bool(&self, selector: &str, op: ElementOp) -> Result<bool, DomError> {
        let name = op.name();
        self.run(selector, op).await?.as_bool().ok_or_else(|| {
            DomError::Evaluation(format!("{} returned a non-boolean result", name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::HealingConfig, config::RetryConfig, types::StrategyKind};
    use dom_adapter::{NodeSpec, StaticDom};

    fn offline_engine(max_attempts: u32) -> Arc<HealingEngine> {
        Arc::new(HealingEngine::new(HealingConfig {
            strategies: vec![
                StrategyKind::DataTestIdRecovery,
                StrategyKind::TextContentMatching,
                StrategyKind::CssHierarchyAnalysis,
            ],
            max_attempts,
            ..HealingConfig::default()
        }))
    }

    fn no_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 0,
            initial_backoff_ms: 1,
            ..RetryConfig::default()
        }
    }

    fn page(dom: StaticDom, max_attempts: u32) -> HealingPage<StaticDom> {
        let engine = offline_engine(max_attempts);
        let retry = RetryHandler::new(Some(engine.clone()), no_retry());
        HealingPage::with_retry(dom, engine, retry)
    }

    fn login_dom() -> StaticDom {
        StaticDom::with_body(vec![NodeSpec::new("form")
            .id("login")
            .child(NodeSpec::new("input").attr("data-testid", "userName"))
            .child(
                NodeSpec::new("button")
                    .class("new-class")
                    .attr("data-testid", "login-submit")
                    .text("Sign in"),
            )])
    }

    #[tokio::test]
    async fn working_selector_bypasses_healing() {
        let page = page(login_dom(), 3);
        page.click("#login button").await.unwrap();
        assert_eq!(page.healing_stats().total_attempts, 0);
        assert_eq!(page.driver().actions().len(), 1);
    }

    #[tokio::test]
    async fn broken_selector_is_healed_and_remembered() {
        let page = page(login_dom(), 3);
        page.fill(r#"[data-testid="user-name"]"#, "ada").await.unwrap();
        assert_eq!(
            page.driver().input_value(r#"[data-testid="userName"]"#).unwrap(),
            Some("ada".to_string())
        );
        assert_eq!(
            page.healed_selector(r#"[data-testid="user-name"]"#).as_deref(),
            Some(r#"[data-testid="userName"]"#)
        );

        page.type_text(r#"[data-testid="user-name"]"#, "!").await.unwrap();
        assert_eq!(page.healing_stats().total_attempts, 1);
        assert_eq!(page.healing_stats().successful_heals, 1);
    }

    #[tokio::test]
    async fn unhealable_failure_returns_original_error() {
        let page = page(login_dom(), 3);
        let err = page.click("#nothing-like-this").await.unwrap_err();
        assert_eq!(err, DomError::ElementNotFound("#nothing-like-this".into()));
        assert_eq!(page.healing_stats().failed_heals, 1);
    }

    #[tokio::test]
    async fn matching_original_is_not_replaced() {
        let dom = StaticDom::with_body(vec![NodeSpec::new("button").id("go").disabled()]);
        let page = page(dom, 3);
        let err = page.click("#go").await.unwrap_err();
        assert!(matches!(err, DomError::NotInteractable { .. }));
        assert_eq!(page.healing_stats().total_attempts, 0);
    }

    #[tokio::test]
    async fn heal_budget_limits_engine_calls() {
        let page = page(login_dom(), 2);
        for _ in 0..4 {
            assert!(page.click("#missing").await.is_err());
        }
        assert_eq!(page.healing_stats().total_attempts, 2);

        page.clear_selector_cache();
        assert!(page.click("#missing").await.is_err());
        assert_eq!(page.healing_stats().total_attempts, 3);
    }

    #[tokio::test]
    async fn queries_heal_too() {
        let page = page(login_dom(), 3);
        let text = page
            .inner_text(r#"[data-testid="login-submitt"]"#)
            .await
            .unwrap();
        assert_eq!(text, "Sign in");
        assert_eq!(
            page.get_attribute(".old-class", "data-testid").await.unwrap(),
            Some("login-submit".to_string())
        );
        assert!(page.report_stats().successful_heals >= 2);
    }
}
