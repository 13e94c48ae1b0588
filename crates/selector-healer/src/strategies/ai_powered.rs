//! AI-assisted analysis
//!
//! Catch-all strategy: describes the page to an Ollama-compatible model,
//! parses the ranked selectors it suggests and keeps those that hit a
//! visible element. Backend faults never escape; they become failed results.

use super::{first_visible, SelectorHealer};
use crate::{
    ai_backend::OllamaClient,
    config::AiBackendConfig,
    errors::{AiBackendError, HealError},
    types::{Alternative, HealingResult, StrategyKind},
};
use async_trait::async_trait;
use dom_adapter::{truncate_chars, DomCapability, PageContext};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_CONFIDENCE: f64 = 70.0;
const EXTRACTED_CONFIDENCE: f64 = 60.0;
const MAX_SELECTOR_LEN: usize = 200;
const MAX_ALTERNATIVES: usize = 5;
const PROMPT_ELEMENTS: usize = 20;
const PROMPT_PREVIEW_CHARS: usize = 200;
const PROMPT_TEXT_CHARS: usize = 30;

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\s*[.)]\s*(.+)$").expect("numbered line regex"));
static CONFIDENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\(\s*(\d{1,3})\s*%[^)]*\)").expect("confidence regex")
});
static REASON_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+[-–—]\s+").expect("reason split regex"));
static SELECTOR_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([#.][\w-]+|\[[\w-]+(?:=["'][^"']*["'])?\]|[\w-]+\[[\w-]+\])"#)
        .expect("selector token regex")
});

/// One parsed model suggestion
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Suggestion {
    pub selector: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Strip wrapping backticks, quotes and markdown emphasis
fn unwrap_selector(raw: &str) -> String {
    let mut selector = raw.trim().trim_matches('*').trim();
    loop {
        let trimmed = selector.trim();
        let unwrapped = ['`', '"', '\'']
            .iter()
            .find(|q| trimmed.len() >= 2 && trimmed.starts_with(**q) && trimmed.ends_with(**q))
            .map(|_| &trimmed[1..trimmed.len() - 1]);
        match unwrapped {
            Some(inner) => selector = inner,
            None => return trimmed.to_string(),
        }
    }
}

/// Cheap syntactic screen applied before touching the page
pub(crate) fn is_valid_selector(selector: &str) -> bool {
    if selector.is_empty() || selector.chars().count() >= MAX_SELECTOR_LEN {
        return false;
    }
    let Some(first) = selector.chars().next() else {
        return false;
    };
    if !(matches!(first, '#' | '.' | '[') || first.is_ascii_alphabetic()) {
        return false;
    }
    if selector.trim_end().ends_with(['>', '+', '~', ',']) {
        return false;
    }

    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    for ch in selector.chars() {
        if let Some(open) = quote {
            if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '[' | '(' => stack.push(ch),
            ']' if stack.pop() != Some('[') => return false,
            ')' if stack.pop() != Some('(') => return false,
            _ => {}
        }
    }
    quote.is_none() && stack.is_empty()
}

fn parse_line(body: &str) -> Option<Suggestion> {
    let (selector, confidence, reasoning) = match CONFIDENCE.captures(body) {
        Some(captures) => {
            let whole = captures.get(0)?;
            let confidence = captures[1].parse::<f64>().unwrap_or(DEFAULT_CONFIDENCE);
            let reasoning = body[whole.end()..]
                .trim_start_matches(|c: char| c.is_whitespace() || "-–—:".contains(c))
                .trim()
                .to_string();
            (&body[..whole.start()], confidence, reasoning)
        }
        None => match REASON_SPLIT.find(body) {
            Some(split) => (
                &body[..split.start()],
                DEFAULT_CONFIDENCE,
                body[split.end()..].trim().to_string(),
            ),
            None => (body, DEFAULT_CONFIDENCE, String::new()),
        },
    };

    let selector = unwrap_selector(selector);
    if !is_valid_selector(&selector) {
        return None;
    }
    Some(Suggestion {
        selector,
        confidence: confidence.clamp(0.0, 100.0),
        reasoning: if reasoning.is_empty() {
            "AI-suggested alternative".to_string()
        } else {
            reasoning
        },
    })
}

/// Parse numbered suggestions; fall back to bare selector tokens
pub(crate) fn parse_suggestions(response: &str) -> Vec<Suggestion> {
    let mut suggestions: Vec<Suggestion> = response
        .lines()
        .filter_map(|line| NUMBERED_LINE.captures(line))
        .filter_map(|captures| parse_line(&captures[1]))
        .collect();

    if suggestions.is_empty() {
        for captures in SELECTOR_TOKEN.captures_iter(response) {
            let selector = captures[1].to_string();
            if is_valid_selector(&selector) && !suggestions.iter().any(|s| s.selector == selector)
            {
                suggestions.push(Suggestion {
                    selector,
                    confidence: EXTRACTED_CONFIDENCE,
                    reasoning: "Extracted from AI response".to_string(),
                });
            }
        }
    }
    suggestions
}

/// Prompt asking for ranked replacements of `selector`
pub(crate) fn build_prompt(selector: &str, context: &PageContext) -> String {
    let elements = context
        .interactive
        .iter()
        .take(PROMPT_ELEMENTS)
        .map(|element| {
            let mut parts = vec![element.tag.clone()];
            if let Some(id) = element.id.as_deref().filter(|id| !id.is_empty()) {
                parts.push(format!("id=\"{}\"", id));
            }
            if !element.classes.is_empty() {
                let classes: Vec<&str> =
                    element.classes.iter().take(2).map(String::as_str).collect();
                parts.push(format!("class=\"{}\"", classes.join(" ")));
            }
            if let Some(role) = element.role.as_deref().filter(|r| !r.is_empty()) {
                parts.push(format!("role=\"{}\"", role));
            }
            if !element.text.is_empty() {
                parts.push(format!(
                    "text=\"{}\"",
                    truncate_chars(&element.text, PROMPT_TEXT_CHARS)
                ));
            }
            parts.join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a test automation expert analyzing a web page to heal a broken selector.

Page Context:
URL: {url}
Title: {title}
Page Preview: {preview}...

Interactive Elements Found:
{elements}

ORIGINAL SELECTOR (BROKEN): {selector}

Task: Suggest 3-5 alternative CSS selectors that might work for the same element.

Requirements:
1. Each suggestion should be on a new line starting with a number
2. Format: \"1. <selector> (confidence%) - reasoning\"
3. Order by confidence (highest first)
4. Consider semantic meaning and likely test intent
5. Prefer stable selectors (data-testid, role, unique classes over nth-child)

Example format:
1. #submit-button (95%) - Unique ID suggests submit action
2. button[type=\"submit\"] (85%) - Semantic button type
3. .btn-primary (70%) - Primary action class pattern

Your suggestions:",
        url = context.url,
        title = context.title,
        preview = truncate_chars(&context.body_text, PROMPT_PREVIEW_CHARS),
        elements = elements,
        selector = selector,
    )
}

fn ranked(mut suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
    suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    suggestions
}

fn alternatives(suggestions: &[Suggestion]) -> Vec<Alternative> {
    suggestions
        .iter()
        .take(MAX_ALTERNATIVES)
        .map(|s| Alternative::new(s.selector.clone(), s.confidence))
        .collect()
}

#[derive(Debug)]
pub struct AiPoweredAnalysis {
    client: OllamaClient,
    cancel: CancellationToken,
}

impl AiPoweredAnalysis {
    /// `cancel` aborts in-flight generation when the strategy is retired
    pub fn new(config: AiBackendConfig, cancel: CancellationToken) -> Self {
        Self {
            client: OllamaClient::new(&config),
            cancel,
        }
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    fn failed(&self, selector: &str, reasoning: impl Into<String>) -> HealingResult {
        HealingResult::failed(selector, self.name(), reasoning)
    }
}

#[async_trait]
impl SelectorHealer for AiPoweredAnalysis {
    async fn heal(
        &self,
        dom: &dyn DomCapability,
        selector: &str,
    ) -> Result<HealingResult, HealError> {
        debug!(
            "Asking {} ({}) about {}",
            self.client.endpoint(),
            self.client.model(),
            selector
        );
        if !self.client.is_reachable().await {
            warn!("AI backend not available at {}", self.client.endpoint());
            return Ok(self.failed(
                selector,
                format!("Ollama service not available at {}", self.client.endpoint()),
            ));
        }

        let context = match dom.page_context().await {
            Ok(context) => context,
            Err(err) => return Ok(self.failed(selector, format!("Error: {}", err))),
        };
        let prompt = build_prompt(selector, &context);

        let response = match self.client.generate(&prompt, &self.cancel).await {
            Ok(response) => response,
            Err(err @ AiBackendError::TimedOut { .. }) => {
                warn!("{}", err);
                return Ok(self.failed(selector, err.to_string()));
            }
            Err(err) => return Ok(self.failed(selector, format!("Error: {}", err))),
        };
        debug!(
            "AI response preview: {}",
            truncate_chars(&response, PROMPT_PREVIEW_CHARS)
        );

        let suggestions = ranked(parse_suggestions(&response));
        if suggestions.is_empty() {
            return Ok(self.failed(selector, "AI did not suggest valid alternatives"));
        }

        let mut verified = Vec::new();
        for suggestion in &suggestions {
            match first_visible(dom, &suggestion.selector).await {
                Ok(Some(_)) => {
                    debug!("Verified AI suggestion {}", suggestion.selector);
                    verified.push(suggestion.clone());
                }
                Ok(None) => debug!("AI suggestion {} not visible", suggestion.selector),
                Err(err) => debug!("AI suggestion {} failed: {}", suggestion.selector, err),
            }
        }

        let Some(best) = verified.first() else {
            return Ok(self
                .failed(selector, "AI suggestions could not be verified on the page")
                .with_alternatives(alternatives(&suggestions)));
        };
        info!("AI healed {} to {}", selector, best.selector);
        Ok(HealingResult::healed(
            best.selector.clone(),
            best.confidence,
            self.name(),
            best.reasoning.clone(),
        )
        .with_alternatives(alternatives(&verified)))
    }

    fn is_applicable(&self, selector: &str) -> bool {
        !selector.trim().is_empty()
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::AiPoweredAnalysis
    }

    async fn health_check(&self, _dom: &dyn DomCapability) -> bool {
        match self.client.ensure_model().await {
            Ok(()) => true,
            Err(err) => {
                warn!("AI backend health check failed: {}", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dom_adapter::InteractiveElement;

    #[test]
    fn parses_numbered_suggestions() {
        let response = "Here you go:\n\
            1. #submit-button (95%) - Unique ID suggests submit action\n\
            2. `button[type=\"submit\"]` (85% confidence) - Semantic button type\n\
            3) button:has-text(\"Sign in\") - visible label\n\
            4. .btn-primary (140%)\n\
            5. div > (50%) - dangling combinator";
        let suggestions = parse_suggestions(response);
        assert_eq!(suggestions.len(), 4);
        assert_eq!(suggestions[0].selector, "#submit-button");
        assert_eq!(suggestions[0].confidence, 95.0);
        assert_eq!(suggestions[0].reasoning, "Unique ID suggests submit action");
        assert_eq!(suggestions[1].selector, "button[type=\"submit\"]");
        assert_eq!(suggestions[2].selector, "button:has-text(\"Sign in\")");
        assert_eq!(suggestions[2].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(suggestions[2].reasoning, "visible label");
        assert_eq!(suggestions[3].confidence, 100.0);
        assert_eq!(suggestions[3].reasoning, "AI-suggested alternative");
    }

    #[test]
    fn falls_back_to_selector_tokens() {
        let suggestions =
            parse_suggestions("Try #login or maybe [data-testid=\"login\"] then #login again");
        let selectors: Vec<_> = suggestions.iter().map(|s| s.selector.as_str()).collect();
        assert_eq!(selectors, vec!["#login", "[data-testid=\"login\"]"]);
        assert!(suggestions
            .iter()
            .all(|s| s.confidence == EXTRACTED_CONFIDENCE && s.reasoning == "Extracted from AI response"));
    }

    #[test]
    fn validity_screen() {
        assert!(is_valid_selector("#a"));
        assert!(is_valid_selector("button[type='submit']"));
        assert!(!is_valid_selector(""));
        assert!(!is_valid_selector("> a"));
        assert!(!is_valid_selector("div >"));
        assert!(!is_valid_selector("[data-x=\"y\""));
        assert!(!is_valid_selector("a:has-text(\"x\""));
        assert!(!is_valid_selector(&format!("#{}", "a".repeat(MAX_SELECTOR_LEN))));
    }

    #[test]
    fn prompt_lists_page_context() {
        let context = PageContext {
            url: "https://shop.test/cart".into(),
            title: "Cart".into(),
            body_text: "Your cart ".repeat(40),
            interactive: vec![InteractiveElement {
                tag: "button".into(),
                text: "Proceed to checkout and pay securely now".into(),
                id: Some("pay".into()),
                classes: vec!["btn".into(), "primary".into(), "large".into()],
                role: None,
                input_type: None,
            }],
        };
        let prompt = build_prompt("#checkout", &context);
        assert!(prompt.contains("URL: https://shop.test/cart"));
        assert!(prompt.contains("button id=\"pay\" class=\"btn primary\" text=\"Proceed to checkout and pay se\""));
        assert!(prompt.contains("ORIGINAL SELECTOR (BROKEN): #checkout"));
        assert!(prompt.contains("1. #submit-button (95%)"));
    }
}
