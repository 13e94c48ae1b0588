//! Test-id recovery
//!
//! Recovers selectors built on `data-testid`-style attributes whose value
//! was renamed, e.g. `submit-btn` becoming `submitBtn`.

use super::{count, locate, quote_css, rank, SelectorHealer, TEST_ID_ATTRIBUTES};
use crate::{
    errors::HealError,
    similarity::{convert_naming, levenshtein_similarity, normalize_identifier, NamingConvention},
    types::{Alternative, HealingResult, StrategyKind},
};
use async_trait::async_trait;
use dom_adapter::DomCapability;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Minimum score a candidate id must beat
const ACCEPT_THRESHOLD: f64 = 70.0;
const MAX_ALTERNATIVES: usize = 5;

static TEST_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let attrs = TEST_ID_ATTRIBUTES
        .iter()
        .map(|attr| regex::escape(attr))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r#"(?i)\[\s*({})\s*=\s*["']([^"']+)["']\s*\]"#, attrs))
        .expect("test-id pattern is valid")
});

/// Attribute name and id embedded in a selector
fn extract_test_id(selector: &str) -> Option<(String, String)> {
    let captures = TEST_ID_PATTERN.captures(selector)?;
    Some((captures[1].to_ascii_lowercase(), captures[2].to_string()))
}

/// Best of raw, separator-insensitive and re-cased similarity
pub(crate) fn score_candidate(original: &str, candidate: &str) -> f64 {
    let raw = levenshtein_similarity(original, candidate);
    let normalized =
        levenshtein_similarity(&normalize_identifier(original), &normalize_identifier(candidate));
    let recased = NamingConvention::ALL
        .iter()
        .map(|convention| levenshtein_similarity(&convert_naming(original, *convention), candidate))
        .fold(0.0, f64::max);
    raw.max(normalized).max(recased)
}

#[derive(Debug, Default)]
pub struct DataTestIdRecovery;

impl DataTestIdRecovery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SelectorHealer for DataTestIdRecovery {
    async fn heal(
        &self,
        dom: &dyn DomCapability,
        selector: &str,
    ) -> Result<HealingResult, HealError> {
        let Some((attribute, original_id)) = extract_test_id(selector) else {
            return Ok(HealingResult::failed(
                selector,
                self.name(),
                "No data-testid attribute found in original selector",
            ));
        };
        debug!("Recovering {}=\"{}\"", attribute, original_id);

        let mut candidates = Vec::new();
        for attr in TEST_ID_ATTRIBUTES {
            for handle in locate(dom, &format!("[{}]", attr)).await? {
                let value = match dom.get_attribute(&handle, attr).await {
                    Ok(Some(value)) if !value.is_empty() => value,
                    Ok(_) => continue,
                    Err(err) if err.is_infrastructure() => return Err(err.into()),
                    Err(_) => continue,
                };
                let score = score_candidate(&original_id, &value);
                if score > ACCEPT_THRESHOLD {
                    debug!("Test id candidate {}=\"{}\" scored {:.1}", attr, value, score);
                    candidates.push(Alternative::new(
                        format!("[{}={}]", attr, quote_css(&value)),
                        score,
                    ));
                }
            }
        }

        let ranked = rank(candidates);
        let Some(best) = ranked.first() else {
            return Ok(HealingResult::failed(
                selector,
                self.name(),
                "No similar test IDs found with sufficient confidence",
            ));
        };

        if count(dom, &best.selector).await? == 0 {
            return Ok(HealingResult::failed(
                selector,
                self.name(),
                format!("Best candidate {} no longer resolves", best.selector),
            )
            .with_alternatives(ranked.into_iter().take(MAX_ALTERNATIVES).collect()));
        }

        let reasoning = format!(
            "Found similar test ID with {:.1}% similarity: {}",
            best.confidence, best.selector
        );
        Ok(HealingResult::healed(
            best.selector.clone(),
            best.confidence,
            self.name(),
            reasoning,
        )
        .with_alternatives(ranked.into_iter().take(MAX_ALTERNATIVES).collect()))
    }

    fn is_applicable(&self, selector: &str) -> bool {
        extract_test_id(selector).is_some()
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::DataTestIdRecovery
    }

    async fn health_check(&self, dom: &dyn DomCapability) -> bool {
        dom.count("[data-testid]").await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dom_adapter::{NodeSpec, StaticDom};

    fn page() -> StaticDom {
        StaticDom::with_body(vec![NodeSpec::new("form")
            .child(NodeSpec::new("button").attr("data-testid", "submitBtn").text("Submit"))
            .child(NodeSpec::new("input").attr("data-cy", "email_field"))
            .child(NodeSpec::new("a").attr("data-testid", "help-link").text("Help"))])
    }

    #[test]
    fn extracts_attribute_and_id() {
        assert_eq!(
            extract_test_id(r#"button[data-testid="submit-btn"]"#),
            Some(("data-testid".into(), "submit-btn".into()))
        );
        assert_eq!(
            extract_test_id("[DATA-CY='email']"),
            Some(("data-cy".into(), "email".into()))
        );
        assert_eq!(extract_test_id("#submit"), None);
    }

    #[test]
    fn recasing_lifts_naming_changes() {
        assert_eq!(score_candidate("submit-btn", "submitBtn"), 100.0);
        assert_eq!(score_candidate("email-field", "email_field"), 100.0);
        assert!(score_candidate("submit-btn", "help-link") < ACCEPT_THRESHOLD);
    }

    #[tokio::test]
    async fn heals_renamed_test_id() {
        let dom = page();
        let strategy = DataTestIdRecovery::new();
        let result = strategy
            .heal(&dom, r#"[data-testid="submit-btn"]"#)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.selector, r#"[data-testid="submitBtn"]"#);
        assert_eq!(result.strategy, "data-testid-recovery");
        assert!(result.confidence > ACCEPT_THRESHOLD);
        assert!(!result.alternatives.is_empty());
    }

    #[tokio::test]
    async fn searches_every_test_id_attribute() {
        let dom = page();
        let result = DataTestIdRecovery::new()
            .heal(&dom, r#"[data-testid="email-field"]"#)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.selector, r#"[data-cy="email_field"]"#);
    }

    #[tokio::test]
    async fn reports_missing_id_and_weak_matches() {
        let dom = page();
        let strategy = DataTestIdRecovery::new();

        let result = strategy.heal(&dom, "#submit").await.unwrap();
        assert!(!result.success);
        assert_eq!(
            result.reasoning,
            "No data-testid attribute found in original selector"
        );

        let result = strategy
            .heal(&dom, r#"[data-testid="checkout-total"]"#)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(
            result.reasoning,
            "No similar test IDs found with sufficient confidence"
        );
    }

    #[tokio::test]
    async fn detached_page_is_an_error() {
        let dom = page();
        dom.set_detached(true);
        let outcome = DataTestIdRecovery::new()
            .heal(&dom, r#"[data-testid="submit-btn"]"#)
            .await;
        assert!(outcome.is_err());
        assert!(!DataTestIdRecovery::new().health_check(&dom).await);
    }

    #[test]
    fn applicability() {
        let strategy = DataTestIdRecovery::new();
        assert!(strategy.is_applicable(r#"[data-testid="x"]"#));
        assert!(strategy.is_applicable(r#"[data-cy="x"]"#));
        assert!(strategy.is_applicable(r#"div [DATA-TEST='login']"#));
        assert!(!strategy.is_applicable(".btn"));
        assert!(!strategy.is_applicable("[data-testid]"));
        assert!(!strategy.is_applicable(r#"[data-testid=""]"#));
        assert!(!strategy.is_applicable(r#"[data-testid*="sub"]"#));
    }
}
