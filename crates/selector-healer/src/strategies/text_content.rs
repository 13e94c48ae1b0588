//! Text content matching
//!
//! Heals `text=` and `:has-text()` selectors by fuzzy-matching the literal
//! against the rendered text of visible elements.

use super::{count, locate, quote_css, SelectorHealer, INTERACTIVE_ROLES, VISIBILITY_TIMEOUT};
use crate::{
    errors::HealError,
    similarity::text_similarity,
    types::{Alternative, HealingResult, StrategyKind},
};
use async_trait::async_trait;
use dom_adapter::{DomCapability, ElementHandle};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

const MIN_SIMILARITY: f64 = 80.0;
const PARTIAL_MIN_SIMILARITY: f64 = MIN_SIMILARITY - 10.0;
const PARTIAL_PENALTY: f64 = 0.9;
const INTERACTIVE_BOOST: f64 = 1.1;
/// Texts longer than this are also matched by their halves
const PARTIAL_MIN_CHARS: usize = 20;
const MAX_ALTERNATIVES: usize = 5;

const INTERACTIVE_TAGS: &[&str] = &["button", "a", "input", "select", "textarea"];
/// Tags that qualify a `:has-text()` selector
const TAG_QUALIFIED: &[&str] = &["button", "a", "input", "select"];

static TEXT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?:^|[^\w-])text\s*=\s*"([^"]+)""#,
        r#"(?:^|[^\w-])text\s*=\s*'([^']+)'"#,
        r#"(?:^|[^\w-])text\s*=\s*([^,\]"']+)"#,
        r#"has-text\(\s*"([^"]+)"\s*\)"#,
        r#"has-text\(\s*'([^']+)'\s*\)"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("text regex"))
    .collect()
});

/// Literal text a selector asks for
fn extract_text(selector: &str) -> Option<String> {
    TEXT_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(selector)
            .map(|captures| captures[1].trim().to_string())
            .filter(|text| !text.is_empty())
    })
}

/// Role-qualified, then tag-qualified, then a plain text selector
fn build_selector(tag: &str, role: Option<&str>, text: &str) -> String {
    if let Some(role) = role.filter(|role| INTERACTIVE_ROLES.contains(role)) {
        return format!("[role={}]:has-text({})", quote_css(role), quote_css(text));
    }
    if TAG_QUALIFIED.contains(&tag) {
        return format!("{}:has-text({})", tag, quote_css(text));
    }
    format!("text={}", quote_css(text))
}

fn is_interactive(tag: &str, role: Option<&str>) -> bool {
    INTERACTIVE_TAGS.contains(&tag) || role.is_some_and(|role| INTERACTIVE_ROLES.contains(&role))
}

/// Words from the front and back half of a long text
fn partial_texts(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let half = (words.len() + 1) / 2;
    let mut partials = vec![
        words[..half].join(" "),
        words[words.len() - half..].join(" "),
    ];
    partials.dedup();
    partials
}

#[derive(Debug)]
struct TextCandidate {
    selector: String,
    confidence: f64,
    interactive: bool,
    order: usize,
}

/// Highest confidence per selector, ties broken interactive-first then by
/// document order
fn rank_candidates(candidates: Vec<TextCandidate>) -> Vec<Alternative> {
    let mut best: HashMap<String, TextCandidate> = HashMap::new();
    for candidate in candidates {
        match best.get_mut(&candidate.selector) {
            Some(existing) if existing.confidence >= candidate.confidence => {}
            Some(existing) => *existing = candidate,
            None => {
                best.insert(candidate.selector.clone(), candidate);
            }
        }
    }
    let mut ranked: Vec<TextCandidate> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(b.interactive.cmp(&a.interactive))
            .then(a.order.cmp(&b.order))
    });
    ranked
        .into_iter()
        .map(|candidate| Alternative::new(candidate.selector, candidate.confidence))
        .collect()
}

#[derive(Debug, Default)]
pub struct TextContentMatching;

impl TextContentMatching {
    pub fn new() -> Self {
        Self
    }

    async fn element_text(
        dom: &dyn DomCapability,
        handle: &ElementHandle,
    ) -> Result<String, HealError> {
        match dom.inner_text(handle).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(err) if err.is_infrastructure() => Err(err.into()),
            Err(_) => Ok(String::new()),
        }
    }

    async fn visible(dom: &dyn DomCapability, handle: &ElementHandle) -> Result<bool, HealError> {
        match dom.is_visible(handle, VISIBILITY_TIMEOUT).await {
            Ok(visible) => Ok(visible),
            Err(err) if err.is_infrastructure() => Err(err.into()),
            Err(_) => Ok(false),
        }
    }

    /// Candidate for a visible element, with `selector_text` used to
    /// address it
    async fn candidate(
        dom: &dyn DomCapability,
        handle: &ElementHandle,
        selector_text: &str,
        similarity: f64,
        order: usize,
    ) -> Result<Option<TextCandidate>, HealError> {
        if !Self::visible(dom, handle).await? {
            return Ok(None);
        }
        let info = match dom.describe(handle).await {
            Ok(info) => info,
            Err(err) if err.is_infrastructure() => return Err(err.into()),
            Err(_) => return Ok(None),
        };
        let interactive = is_interactive(&info.tag, info.role.as_deref());
        let confidence = if interactive {
            (similarity * INTERACTIVE_BOOST).min(100.0)
        } else {
            similarity
        };
        Ok(Some(TextCandidate {
            selector: build_selector(&info.tag, info.role.as_deref(), selector_text),
            confidence,
            interactive,
            order,
        }))
    }
}

#[async_trait]
impl SelectorHealer for TextContentMatching {
    async fn heal(
        &self,
        dom: &dyn DomCapability,
        selector: &str,
    ) -> Result<HealingResult, HealError> {
        let Some(original_text) = extract_text(selector) else {
            return Ok(HealingResult::failed(
                selector,
                self.name(),
                "No text content found in original selector",
            ));
        };
        debug!("Matching text \"{}\"", original_text);

        let mut candidates = Vec::new();
        let elements = locate(dom, "body *").await?;
        for (order, handle) in elements.iter().enumerate() {
            let element_text = Self::element_text(dom, handle).await?;
            if element_text.is_empty() {
                continue;
            }
            let similarity = text_similarity(&original_text, &element_text);
            if similarity < MIN_SIMILARITY {
                continue;
            }
            if let Some(candidate) =
                Self::candidate(dom, handle, &element_text, similarity, order).await?
            {
                debug!(
                    "Text candidate \"{}\" scored {:.1}",
                    element_text, candidate.confidence
                );
                candidates.push(candidate);
            }
        }

        if original_text.chars().count() > PARTIAL_MIN_CHARS {
            for partial in partial_texts(&original_text) {
                let handles = locate(dom, &format!("text={}", partial)).await?;
                for (order, handle) in handles.iter().enumerate() {
                    let element_text = Self::element_text(dom, handle).await?;
                    let similarity = text_similarity(&original_text, &element_text);
                    if similarity < PARTIAL_MIN_SIMILARITY {
                        continue;
                    }
                    if let Some(mut candidate) =
                        Self::candidate(dom, handle, &partial, similarity, elements.len() + order)
                            .await?
                    {
                        candidate.confidence = similarity * PARTIAL_PENALTY;
                        candidates.push(candidate);
                    }
                }
            }
        }

        let ranked = rank_candidates(candidates);
        if let Some(best) = ranked.first() {
            if count(dom, &best.selector).await? > 0 {
                let reasoning = format!(
                    "Found element with matching text ({:.2}% similarity)",
                    best.confidence
                );
                return Ok(HealingResult::healed(
                    best.selector.clone(),
                    best.confidence,
                    self.name(),
                    reasoning,
                )
                .with_alternatives(ranked.into_iter().take(MAX_ALTERNATIVES).collect()));
            }
            debug!("Text candidate {} not accessible", best.selector);
        }

        Ok(HealingResult::failed(
            selector,
            self.name(),
            format!("No text matches found with >{}% similarity", MIN_SIMILARITY),
        )
        .with_alternatives(ranked.into_iter().take(MAX_ALTERNATIVES).collect()))
    }

    fn is_applicable(&self, selector: &str) -> bool {
        extract_text(selector).is_some()
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::TextContentMatching
    }

    async fn health_check(&self, dom: &dyn DomCapability) -> bool {
        matches!(dom.count("body").await, Ok(n) if n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dom_adapter::{NodeSpec, StaticDom};

    #[test]
    fn extracts_text_predicates() {
        assert_eq!(extract_text(r#"text="Add to cart""#).as_deref(), Some("Add to cart"));
        assert_eq!(extract_text("text='Log in'").as_deref(), Some("Log in"));
        assert_eq!(extract_text("text=Sign up").as_deref(), Some("Sign up"));
        assert_eq!(
            extract_text(r#"button:has-text("Buy now")"#).as_deref(),
            Some("Buy now")
        );
        assert_eq!(extract_text("div[context=main]"), None);
        assert_eq!(extract_text("#submit"), None);
    }

    #[test]
    fn selectors_prefer_role_then_tag() {
        assert_eq!(
            build_selector("div", Some("button"), "Go"),
            r#"[role="button"]:has-text("Go")"#
        );
        assert_eq!(build_selector("a", None, "Home"), r#"a:has-text("Home")"#);
        assert_eq!(build_selector("span", Some("note"), "Hi"), r#"text="Hi""#);
    }

    #[test]
    fn partials_split_on_word_halves() {
        assert_eq!(
            partial_texts("Subscribe to our weekly newsletter"),
            vec!["Subscribe to our", "our weekly newsletter"]
        );
    }

    #[tokio::test]
    async fn heals_case_changed_button_text() {
        let dom = StaticDom::with_body(vec![NodeSpec::new("div")
            .class("product")
            .child(NodeSpec::new("button").class("cta").text("Add To Cart"))]);
        let result = TextContentMatching::new()
            .heal(&dom, r#"text="Add to cart""#)
            .await
            .unwrap();
        assert!(result.success, "{}", result.reasoning);
        assert_eq!(result.selector, r#"button:has-text("Add To Cart")"#);
        assert_eq!(result.confidence, 100.0);
        assert!(result.alternatives.len() >= 2);
    }

    #[tokio::test]
    async fn role_wins_over_tag() {
        let dom = StaticDom::with_body(vec![NodeSpec::new("span")
            .attr("role", "link")
            .text("View orders")]);
        let result = TextContentMatching::new()
            .heal(&dom, "text=View Orders")
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.selector, r#"[role="link"]:has-text("View orders")"#);
    }

    #[tokio::test]
    async fn long_text_falls_back_to_partial_match() {
        let dom = StaticDom::with_body(vec![NodeSpec::new("section")
            .child(NodeSpec::new("button").text("Subscribe to our weekly"))]);
        let result = TextContentMatching::new()
            .heal(&dom, r#"text="Subscribe to our weekly newsletter""#)
            .await
            .unwrap();
        assert!(result.success, "{}", result.reasoning);
        assert_eq!(result.selector, r#"button:has-text("Subscribe to our")"#);
        assert!(result.confidence < PARTIAL_MIN_SIMILARITY);
    }

    #[tokio::test]
    async fn heals_onto_text_containing_quotes() {
        let dom = StaticDom::with_body(vec![NodeSpec::new("p")
            .class("greeting")
            .child(NodeSpec::new("span").text(r#"Say "hi" now"#))]);
        let result = TextContentMatching::new()
            .heal(&dom, r#"text='Say "hi" now'"#)
            .await
            .unwrap();
        assert!(result.success, "{}", result.reasoning);
        assert_eq!(result.selector, r#"text="Say \"hi\" now""#);
        assert_eq!(dom.count(&result.selector).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn hidden_and_dissimilar_text_fails() {
        let dom = StaticDom::with_body(vec![
            NodeSpec::new("button").text("Add to cart").hidden(),
            NodeSpec::new("button").text("Checkout"),
        ]);
        let result = TextContentMatching::new()
            .heal(&dom, r#"text="Add to cart""#)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.reasoning, "No text matches found with >80% similarity");
    }
}
