//! Healing strategies
//!
//! Four strategies share the [`SelectorHealer`] contract:
//! 1. Test-id recovery - fuzzy match of `data-testid`-style identifiers
//! 2. Text content - fuzzy match of visible element text
//! 3. CSS hierarchy - candidate generation from the selector and live DOM
//! 4. AI analysis - suggestions from an Ollama-compatible model
//!
//! [`HealingStrategy`] closes the set so the engine never dispatches on
//! strategy names.

mod ai_powered;
mod css_hierarchy;
mod data_testid;
mod text_content;

pub use ai_powered::AiPoweredAnalysis;
pub use css_hierarchy::CssHierarchyAnalysis;
pub use data_testid::DataTestIdRecovery;
pub use text_content::TextContentMatching;

use crate::{
    config::HealingConfig,
    errors::HealError,
    types::{Alternative, HealingResult, StrategyKind},
};
use async_trait::async_trait;
use dom_adapter::{DomCapability, DomError, ElementHandle};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Attributes recognised as test identifiers
pub const TEST_ID_ATTRIBUTES: &[&str] = &[
    "data-testid",
    "data-test-id",
    "data-cy",
    "data-test",
    "testid",
    "test-id",
];

/// Roles treated as interactive when scoring and building selectors
pub const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "checkbox", "radio", "textbox", "combobox", "menuitem", "tab", "option",
    "switch",
];

/// Visibility wait used when verifying candidates
pub(crate) const VISIBILITY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Strategy contract
///
/// `Ok` carries every data outcome, including "nothing found". `Err` is
/// reserved for infrastructure faults; the engine demotes a strategy that
/// returns one.
#[async_trait]
pub trait SelectorHealer: Send + Sync {
    /// Attempt to find a working replacement for `selector`
    async fn heal(
        &self,
        dom: &dyn DomCapability,
        selector: &str,
    ) -> Result<HealingResult, HealError>;

    /// Pure syntactic check
    fn is_applicable(&self, selector: &str) -> bool;

    fn kind(&self) -> StrategyKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Probe the strategy's dependencies
    async fn health_check(&self, dom: &dyn DomCapability) -> bool;
}

/// The closed set of strategies held by the engine
#[derive(Debug)]
pub enum HealingStrategy {
    DataTestId(DataTestIdRecovery),
    TextContent(TextContentMatching),
    CssHierarchy(CssHierarchyAnalysis),
    AiPowered(AiPoweredAnalysis),
}

impl HealingStrategy {
    /// Instantiate the strategy for `kind`; `cancel` bounds in-flight AI calls
    pub fn from_kind(kind: StrategyKind, config: &HealingConfig, cancel: &CancellationToken) -> Self {
        match kind {
            StrategyKind::DataTestIdRecovery => {
                HealingStrategy::DataTestId(DataTestIdRecovery::new())
            }
            StrategyKind::TextContentMatching => {
                HealingStrategy::TextContent(TextContentMatching::new())
            }
            StrategyKind::CssHierarchyAnalysis => {
                HealingStrategy::CssHierarchy(CssHierarchyAnalysis::new())
            }
            StrategyKind::AiPoweredAnalysis => HealingStrategy::AiPowered(
                AiPoweredAnalysis::new(config.ai_backend.clone(), cancel.child_token()),
            ),
        }
    }

    fn inner(&self) -> &dyn SelectorHealer {
        match self {
            HealingStrategy::DataTestId(strategy) => strategy,
            HealingStrategy::TextContent(strategy) => strategy,
            HealingStrategy::CssHierarchy(strategy) => strategy,
            HealingStrategy::AiPowered(strategy) => strategy,
        }
    }
}

#[async_trait]
impl SelectorHealer for HealingStrategy {
    async fn heal(
        &self,
        dom: &dyn DomCapability,
        selector: &str,
    ) -> Result<HealingResult, HealError> {
        self.inner().heal(dom, selector).await
    }

    fn is_applicable(&self, selector: &str) -> bool {
        self.inner().is_applicable(selector)
    }

    fn kind(&self) -> StrategyKind {
        self.inner().kind()
    }

    async fn health_check(&self, dom: &dyn DomCapability) -> bool {
        self.inner().health_check(dom).await
    }
}

/// Quote a value for use inside `[attr="..."]` or `:has-text("...")`
pub(crate) fn quote_css(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Keep only infrastructure faults; a candidate the page rejects is a miss
fn absorb(selector: &str, err: DomError) -> Result<(), HealError> {
    if err.is_infrastructure() {
        return Err(err.into());
    }
    debug!("Candidate {} rejected by page: {}", selector, err);
    Ok(())
}

/// Elements matching `selector`; an unsupported selector matches nothing
pub(crate) async fn locate(
    dom: &dyn DomCapability,
    selector: &str,
) -> Result<Vec<ElementHandle>, HealError> {
    match dom.locate_all(selector).await {
        Ok(handles) => Ok(handles),
        Err(err) => absorb(selector, err).map(|_| Vec::new()),
    }
}

pub(crate) async fn count(dom: &dyn DomCapability, selector: &str) -> Result<usize, HealError> {
    match dom.count(selector).await {
        Ok(count) => Ok(count),
        Err(err) => absorb(selector, err).map(|_| 0),
    }
}

/// First match of `selector` when it is visible
pub(crate) async fn first_visible(
    dom: &dyn DomCapability,
    selector: &str,
) -> Result<Option<ElementHandle>, HealError> {
    let Some(first) = locate(dom, selector).await?.into_iter().next() else {
        return Ok(None);
    };
    match dom.is_visible(&first, VISIBILITY_TIMEOUT).await {
        Ok(true) => Ok(Some(first)),
        Ok(false) => Ok(None),
        Err(err) => absorb(selector, err).map(|_| None),
    }
}

/// Deduplicate by selector keeping the highest confidence, then sort
/// descending. Ties keep their first-seen order.
pub(crate) fn rank(candidates: Vec<Alternative>) -> Vec<Alternative> {
    let mut ranked: Vec<Alternative> = Vec::with_capacity(candidates.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for candidate in candidates {
        match index.get(&candidate.selector) {
            Some(&pos) => {
                if candidate.confidence > ranked[pos].confidence {
                    ranked[pos].confidence = candidate.confidence;
                }
            }
            None => {
                index.insert(candidate.selector.clone(), ranked.len());
                ranked.push(candidate);
            }
        }
    }
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_quotes_and_backslashes() {
        assert_eq!(quote_css("plain"), "\"plain\"");
        assert_eq!(quote_css("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote_css("a\\b"), "\"a\\\\b\"");
    }

    #[test]
    fn ranking_dedupes_and_is_stable() {
        let ranked = rank(vec![
            Alternative::new("#a", 70.0),
            Alternative::new("#b", 90.0),
            Alternative::new("#a", 95.0),
            Alternative::new("#c", 90.0),
        ]);
        let order: Vec<_> = ranked.iter().map(|a| a.selector.as_str()).collect();
        assert_eq!(order, vec!["#a", "#b", "#c"]);
        assert_eq!(ranked[0].confidence, 95.0);
    }

    #[test]
    fn strategies_built_from_kind() {
        let config = HealingConfig::default();
        let cancel = CancellationToken::new();
        for kind in StrategyKind::ALL {
            let strategy = HealingStrategy::from_kind(kind, &config, &cancel);
            assert_eq!(strategy.kind(), kind);
            assert_eq!(strategy.name(), kind.name());
        }
    }
}
