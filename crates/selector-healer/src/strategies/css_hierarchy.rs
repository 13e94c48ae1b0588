//! CSS hierarchy analysis
//!
//! Generates replacement selectors in two waves:
//! - seeds taken from the broken selector itself (id, classes, attributes)
//!   plus classes on the page that resemble the broken ones
//! - derivations from every live, visible element a candidate hits
//!   (test ids, role/aria, parent-child, nth-child, nth-of-type and
//!   descendant paths), fed back into the same pool
//!
//! Each selector string is tried at most once.

use super::{first_visible, locate, quote_css, SelectorHealer, TEST_ID_ATTRIBUTES};
use crate::{
    errors::HealError,
    types::{Alternative, HealingResult, StrategyKind},
};
use async_trait::async_trait;
use dom_adapter::{DomCapability, ElementInfo};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const MAX_ALTERNATIVES: usize = 10;
/// Elements inspected per class token when looking for similar classes
const SIMILAR_CLASS_SCAN: usize = 5;
const MIN_CLASS_TOKEN: usize = 3;
/// Ancestor levels walked for descendant paths, the element included
const DESCENDANT_DEPTH: usize = 4;
/// Upper bound on distinct selectors tried per heal
const MAX_POOL: usize = 200;

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^([a-z][a-z0-9]*)").expect("tag regex"));
static ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#([a-z_][\w-]*)").expect("id regex"));
static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.([a-z_][\w-]*)").expect("class regex"));
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\[([^=\]]+)(?:=["']([^"']+)["'])?\]"#).expect("attribute regex")
});
static APPLICABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[#.\[\w]").expect("applicability regex"));

/// Components recovered from a broken selector
#[derive(Debug, Default, PartialEq)]
struct ParsedSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    /// Name and value; an empty value means presence only
    attributes: Vec<(String, String)>,
}

fn parse_selector(selector: &str) -> ParsedSelector {
    let mut parsed = ParsedSelector {
        tag: TAG_RE
            .captures(selector)
            .map(|c| c[1].to_ascii_lowercase()),
        id: ID_RE.captures(selector).map(|c| c[1].to_string()),
        ..Default::default()
    };

    // attribute values may contain dots; classes come from outside brackets
    let outside_brackets = ATTR_RE.replace_all(selector, " ");
    for captures in CLASS_RE.captures_iter(&outside_brackets) {
        let class = captures[1].to_string();
        if !parsed.classes.contains(&class) {
            parsed.classes.push(class);
        }
    }

    for captures in ATTR_RE.captures_iter(selector) {
        let name = captures[1]
            .trim()
            .trim_end_matches(['*', '^', '$', '~', '|'])
            .to_string();
        let value = captures.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
        if name.is_empty() || parsed.attributes.iter().any(|(n, _)| *n == name) {
            continue;
        }
        parsed.attributes.push((name, value));
    }
    parsed
}

/// Where a candidate came from; names feed the reasoning string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateSource {
    Id,
    Class,
    Attribute,
    SimilarClass,
    TestId,
    Role,
    ParentChild,
    NthChild,
    NthOfType,
    Descendant,
}

impl CandidateSource {
    fn label(&self) -> &'static str {
        match self {
            CandidateSource::Id => "id-selector",
            CandidateSource::Class => "class-selector",
            CandidateSource::Attribute => "attribute-selector",
            CandidateSource::SimilarClass => "similar-class",
            CandidateSource::TestId => "test-id-attribute",
            CandidateSource::Role => "role-selector",
            CandidateSource::ParentChild => "parent-child",
            CandidateSource::NthChild => "nth-child",
            CandidateSource::NthOfType => "nth-of-type",
            CandidateSource::Descendant => "descendant",
        }
    }

    /// Fixed priority of non-seed candidates; seeds are ranked by position
    fn derived_priority(&self) -> f64 {
        match self {
            CandidateSource::Id => 100.0,
            CandidateSource::Class => 90.0,
            CandidateSource::Attribute | CandidateSource::TestId => 85.0,
            CandidateSource::Role => 80.0,
            CandidateSource::ParentChild => 75.0,
            CandidateSource::NthChild | CandidateSource::NthOfType => 70.0,
            CandidateSource::Descendant => 65.0,
            CandidateSource::SimilarClass => 60.0,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    selector: String,
    source: CandidateSource,
    priority: f64,
}

/// Growing work list of candidates; verified entries point into it
#[derive(Debug, Default)]
struct CandidatePool {
    queue: Vec<Candidate>,
    index: HashMap<String, usize>,
    verified: Vec<usize>,
}

impl CandidatePool {
    /// Queue a selector, or raise the priority of one already queued
    fn push(&mut self, selector: String, source: CandidateSource, priority: f64) {
        if let Some(&pos) = self.index.get(&selector) {
            let existing = &mut self.queue[pos];
            if priority > existing.priority {
                existing.priority = priority;
                existing.source = source;
            }
            return;
        }
        if self.queue.len() >= MAX_POOL {
            return;
        }
        self.index.insert(selector.clone(), self.queue.len());
        self.queue.push(Candidate {
            selector,
            source,
            priority,
        });
    }

    fn derive(&mut self, selector: String, source: CandidateSource) {
        let priority = source.derived_priority();
        self.push(selector, source, priority);
    }

    fn verify(&mut self, pos: usize) {
        self.verified.push(pos);
    }

    /// Verified candidates, best first; ties keep discovery order
    fn ranked(&self) -> Vec<Candidate> {
        let mut ranked: Vec<Candidate> = self
            .verified
            .iter()
            .map(|&pos| self.queue[pos].clone())
            .collect();
        ranked.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        ranked
    }
}

fn seed_candidates(pool: &mut CandidatePool, parsed: &ParsedSelector) {
    if let Some(id) = &parsed.id {
        pool.push(format!("#{}", id), CandidateSource::Id, 100.0);
    }

    let classes = &parsed.classes;
    let mut class_selectors: Vec<String> = classes.iter().map(|c| format!(".{}", c)).collect();
    for i in 0..classes.len() {
        for j in i + 1..classes.len() {
            class_selectors.push(format!(".{}.{}", classes[i], classes[j]));
        }
    }
    if classes.len() > 2 {
        class_selectors.push(format!(".{}", classes.join(".")));
    }
    for (idx, selector) in class_selectors.into_iter().enumerate() {
        pool.push(selector, CandidateSource::Class, 90.0 - 5.0 * idx as f64);
    }

    let attribute_selectors = parsed
        .attributes
        .iter()
        .filter(|(name, _)| name != "class" && name != "id")
        .map(|(name, value)| {
            if value.is_empty() {
                format!("[{}]", name)
            } else {
                format!("[{}={}]", name, quote_css(value))
            }
        });
    for (idx, selector) in attribute_selectors.enumerate() {
        pool.push(selector, CandidateSource::Attribute, 85.0 - 5.0 * idx as f64);
    }
}

/// Class tokens worth searching for, e.g. `old-class` gives `old`, `class`
fn class_tokens(class: &str) -> Vec<&str> {
    class
        .split(['-', '_'])
        .filter(|token| token.chars().count() >= MIN_CLASS_TOKEN)
        .collect()
}

async fn seed_similar_classes(
    dom: &dyn DomCapability,
    pool: &mut CandidatePool,
    classes: &[String],
) -> Result<(), HealError> {
    let mut probed = HashSet::new();
    for class in classes {
        for token in class_tokens(class) {
            if !probed.insert(token.to_string()) {
                continue;
            }
            let handles = locate(dom, &format!("[class*={}]", quote_css(token))).await?;
            for handle in handles.iter().take(SIMILAR_CLASS_SCAN) {
                let value = match dom.get_attribute(handle, "class").await {
                    Ok(value) => value.unwrap_or_default(),
                    Err(err) if err.is_infrastructure() => return Err(err.into()),
                    Err(_) => continue,
                };
                for found in value.split_whitespace() {
                    if found != class && found.contains(token) {
                        pool.derive(format!(".{}", found), CandidateSource::SimilarClass);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Candidates derived from a live element
fn derive_from_element(pool: &mut CandidatePool, info: &ElementInfo) {
    for attr in TEST_ID_ATTRIBUTES {
        if let Some(value) = info.attribute(attr).filter(|v| !v.is_empty()) {
            pool.derive(format!("[{}={}]", attr, quote_css(value)), CandidateSource::TestId);
        }
    }

    if let Some(role) = info.role.as_deref().filter(|r| !r.is_empty()) {
        pool.derive(format!("[role={}]", quote_css(role)), CandidateSource::Role);
    }
    for attr in ["aria-label", "aria-labelledby"] {
        if let Some(value) = info.attribute(attr).filter(|v| !v.is_empty()) {
            pool.derive(format!("[{}={}]", attr, quote_css(value)), CandidateSource::Role);
        }
    }

    let tag = info.tag.as_str();
    if let Some(parent) = &info.parent {
        pool.derive(format!("{} > {}", parent.tag, tag), CandidateSource::ParentChild);
        if let Some(parent_class) = parent.classes.first() {
            pool.derive(
                format!("{}.{} > {}", parent.tag, parent_class, tag),
                CandidateSource::ParentChild,
            );
        }
        if let Some(class) = info.classes.first() {
            pool.derive(
                format!("{} > {}.{}", parent.tag, tag, class),
                CandidateSource::ParentChild,
            );
        }

        if info.child_index > 0 {
            pool.derive(
                format!("{} > :nth-child({})", parent.tag, info.child_index),
                CandidateSource::NthChild,
            );
            pool.derive(
                format!(":nth-child({})", info.child_index),
                CandidateSource::NthChild,
            );
        }
        if info.type_index > 0 {
            pool.derive(
                format!("{}:nth-of-type({})", tag, info.type_index),
                CandidateSource::NthOfType,
            );
        }
    }

    for selector in descendant_paths(info) {
        pool.derive(selector, CandidateSource::Descendant);
    }
}

/// Path steps from the outermost ancestor down to the element, stopping at
/// the first element with an id
fn descendant_paths(info: &ElementInfo) -> Vec<String> {
    let step = |tag: &str, id: Option<&str>, classes: &[String]| match (id, classes.first()) {
        (Some(id), _) if !id.is_empty() => (format!("#{}", id), true),
        (_, Some(class)) => (format!("{}.{}", tag, class), false),
        _ => (tag.to_string(), false),
    };

    let mut parts = Vec::new();
    let (own, stop) = step(&info.tag, info.id.as_deref(), &info.classes);
    parts.push(own);
    if !stop {
        for ancestor in info.ancestors.iter().take(DESCENDANT_DEPTH - 1) {
            let (part, stop) = step(&ancestor.tag, ancestor.id.as_deref(), &ancestor.classes);
            parts.push(part);
            if stop {
                break;
            }
        }
    }
    parts.reverse();

    let mut selectors = Vec::with_capacity(parts.len() * 2);
    for start in 0..parts.len() {
        selectors.push(parts[start..].join(" > "));
        selectors.push(parts[start..].join(" "));
    }
    selectors
}

#[derive(Debug, Default)]
pub struct CssHierarchyAnalysis;

impl CssHierarchyAnalysis {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SelectorHealer for CssHierarchyAnalysis {
    async fn heal(
        &self,
        dom: &dyn DomCapability,
        selector: &str,
    ) -> Result<HealingResult, HealError> {
        let parsed = parse_selector(selector);
        debug!("Parsed {} into {:?}", selector, parsed);

        let mut pool = CandidatePool::default();
        seed_candidates(&mut pool, &parsed);
        seed_similar_classes(dom, &mut pool, &parsed.classes).await?;

        let mut next = 0;
        while next < pool.queue.len() {
            let pos = next;
            next += 1;
            let candidate = pool.queue[pos].clone();

            let Some(handle) = first_visible(dom, &candidate.selector).await? else {
                continue;
            };
            let info = match dom.describe(&handle).await {
                Ok(info) => info,
                Err(err) if err.is_infrastructure() => return Err(err.into()),
                Err(err) => {
                    debug!("Skipping {}: {}", candidate.selector, err);
                    continue;
                }
            };
            debug!(
                "Candidate {} ({}) hit a visible <{}>",
                candidate.selector,
                candidate.source.label(),
                info.tag
            );
            derive_from_element(&mut pool, &info);
            pool.verify(pos);
        }

        let ranked = pool.ranked();
        let Some(best) = ranked.first() else {
            return Ok(HealingResult::failed(
                selector,
                self.name(),
                "No alternative CSS selectors could locate a visible element",
            ));
        };

        let reasoning = format!(
            "Generated alternative using css-hierarchy-{}",
            best.source.label()
        );
        let alternatives = ranked
            .iter()
            .take(MAX_ALTERNATIVES)
            .map(|candidate| Alternative::new(candidate.selector.clone(), candidate.priority))
            .collect();
        Ok(
            HealingResult::healed(best.selector.clone(), best.priority, self.name(), reasoning)
                .with_alternatives(alternatives),
        )
    }

    fn is_applicable(&self, selector: &str) -> bool {
        APPLICABLE_RE.is_match(selector.trim_start())
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::CssHierarchyAnalysis
    }

    async fn health_check(&self, dom: &dyn DomCapability) -> bool {
        dom.count("body").await.is_ok()
    }
}
