//! In-memory page
//!
//! `StaticDom` holds a node tree described by a serde [`PageSpec`] and serves
//! both capability traits from it. Pages are usually written as JSON or YAML
//! fixtures; tests also build them with the [`NodeSpec`] builder methods.

use crate::{
    capability::{DomCapability, PageActions},
    errors::DomError,
    selector::{normalize_whitespace, NodeView, Selector},
    types::*,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

const INTERACTIVE_TAGS: &[&str] = &["button", "a", "input", "select", "textarea"];
const INTERACTIVE_ROLES: &[&str] = &["button", "link", "textbox"];
const HANDLE_PREFIX: &str = "node-";

fn default_true() -> bool {
    true
}

fn default_url() -> String {
    "about:blank".to_string()
}

/// Serializable description of a page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSpec {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Children of `<body>`
    #[serde(default)]
    pub body: Vec<NodeSpec>,
}

impl PageSpec {
    pub fn new(body: Vec<NodeSpec>) -> Self {
        Self {
            url: default_url(),
            title: String::new(),
            body,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Serializable description of one element
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            text: None,
            visible: true,
            enabled: true,
            children: Vec::new(),
        }
    }

    pub fn id(self, id: impl Into<String>) -> Self {
        self.attr("id", id)
    }

    /// Append a class to the `class` attribute
    pub fn class(mut self, class: impl Into<String>) -> Self {
        let class = class.into();
        self.attributes
            .entry("class".to_string())
            .and_modify(|existing| {
                existing.push(' ');
                existing.push_str(&class);
            })
            .or_insert(class);
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }
}

/// One recorded element interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub selector: String,
    pub op: String,
    pub element: ElementHandle,
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    visible: bool,
    enabled: bool,
    parent: Option<usize>,
    children: Vec<usize>,
    value: String,
    checked: bool,
}

#[derive(Debug, Default)]
struct Arena {
    nodes: Vec<Node>,
    focused: Option<usize>,
}

const BODY: usize = 1;

impl Arena {
    fn build(body: Vec<NodeSpec>) -> Self {
        let mut arena = Arena::default();
        let html = arena.push(NodeSpec::new("html"), None);
        let body_idx = arena.push(NodeSpec::new("body"), Some(html));
        debug_assert_eq!(body_idx, BODY);
        for spec in body {
            arena.insert(spec, body_idx);
        }
        arena
    }

    fn push(&mut self, spec: NodeSpec, parent: Option<usize>) -> usize {
        let idx = self.nodes.len();
        let value = spec.attributes.get("value").cloned().unwrap_or_default();
        let checked = spec.attributes.contains_key("checked");
        self.nodes.push(Node {
            tag: spec.tag.to_ascii_lowercase(),
            attributes: spec.attributes,
            text: spec.text.unwrap_or_default(),
            visible: spec.visible,
            enabled: spec.enabled,
            parent,
            children: Vec::new(),
            value,
            checked,
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(idx);
        }
        idx
    }

    fn insert(&mut self, mut spec: NodeSpec, parent: usize) {
        let children = std::mem::take(&mut spec.children);
        let idx = self.push(spec, Some(parent));
        for child in children {
            self.insert(child, idx);
        }
    }

    fn query(&self, selector: &str) -> Result<Vec<usize>, DomError> {
        let parsed = Selector::parse(selector)?;
        Ok((0..self.nodes.len())
            .filter(|&idx| parsed.matches(self, idx))
            .collect())
    }

    fn is_rendered(&self, idx: usize) -> bool {
        let mut current = Some(idx);
        while let Some(node) = current {
            if !self.nodes[node].visible {
                return false;
            }
            current = self.nodes[node].parent;
        }
        true
    }

    fn rendered_text(&self, idx: usize) -> String {
        fn collect(arena: &Arena, idx: usize, out: &mut Vec<String>) {
            let node = &arena.nodes[idx];
            out.push(node.text.clone());
            for &child in &node.children {
                if arena.nodes[child].visible {
                    collect(arena, child, out);
                }
            }
        }
        let mut parts = Vec::new();
        collect(self, idx, &mut parts);
        normalize_whitespace(&parts.join(" "))
    }

    fn inner_html(&self, idx: usize) -> String {
        fn render(arena: &Arena, idx: usize, out: &mut String) {
            let node = &arena.nodes[idx];
            out.push('<');
            out.push_str(&node.tag);
            for (name, value) in &node.attributes {
                out.push_str(&format!(" {}=\"{}\"", name, value));
            }
            out.push('>');
            out.push_str(&node.text);
            for &child in &node.children {
                render(arena, child, out);
            }
            out.push_str(&format!("</{}>", node.tag));
        }
        let node = &self.nodes[idx];
        let mut out = node.text.clone();
        for &child in &node.children {
            render(self, child, &mut out);
        }
        out
    }

    fn classes(&self, idx: usize) -> Vec<String> {
        self.nodes[idx]
            .attributes
            .get("class")
            .map(|classes| classes.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn describe(&self, idx: usize) -> ElementInfo {
        let node = &self.nodes[idx];
        let parent = node.parent.map(|p| ParentInfo {
            tag: self.nodes[p].tag.clone(),
            classes: self.classes(p),
        });
        let sibling_count = node
            .parent
            .map(|p| self.nodes[p].children.len())
            .unwrap_or(1);

        let mut ancestors = Vec::new();
        let mut current = node.parent;
        while let Some(ancestor) = current {
            if ancestor <= BODY {
                break;
            }
            let info = &self.nodes[ancestor];
            ancestors.push(AncestorInfo {
                tag: info.tag.clone(),
                id: info.attributes.get("id").cloned(),
                classes: self.classes(ancestor),
            });
            current = info.parent;
        }

        ElementInfo {
            tag: node.tag.clone(),
            id: node.attributes.get("id").cloned(),
            classes: self.classes(idx),
            attributes: node.attributes.clone(),
            role: node.attributes.get("role").cloned(),
            text: self.text(idx),
            parent,
            sibling_count,
            child_index: self.child_index(idx),
            type_index: self.type_index(idx),
            ancestors,
        }
    }

    fn is_interactive(&self, idx: usize) -> bool {
        let node = &self.nodes[idx];
        INTERACTIVE_TAGS.contains(&node.tag.as_str())
            || node
                .attributes
                .get("role")
                .is_some_and(|role| INTERACTIVE_ROLES.contains(&role.as_str()))
    }

    fn is_descendant_of(&self, idx: usize, ancestor: usize) -> bool {
        let mut current = self.nodes[idx].parent;
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.nodes[node].parent;
        }
        false
    }
}

impl NodeView for Arena {
    fn tag(&self, node: usize) -> &str {
        &self.nodes[node].tag
    }

    fn attribute(&self, node: usize, name: &str) -> Option<&str> {
        self.nodes[node].attributes.get(name).map(String::as_str)
    }

    fn parent(&self, node: usize) -> Option<usize> {
        self.nodes[node].parent
    }

    fn children(&self, node: usize) -> &[usize] {
        &self.nodes[node].children
    }

    fn child_index(&self, node: usize) -> usize {
        self.nodes[node]
            .parent
            .and_then(|p| self.nodes[p].children.iter().position(|&c| c == node))
            .map(|pos| pos + 1)
            .unwrap_or(0)
    }

    fn type_index(&self, node: usize) -> usize {
        let tag = &self.nodes[node].tag;
        self.nodes[node]
            .parent
            .and_then(|p| {
                self.nodes[p]
                    .children
                    .iter()
                    .filter(|&&c| &self.nodes[c].tag == tag)
                    .position(|&c| c == node)
            })
            .map(|pos| pos + 1)
            .unwrap_or(0)
    }

    fn text(&self, node: usize) -> String {
        fn collect(arena: &Arena, idx: usize, out: &mut Vec<String>) {
            let node = &arena.nodes[idx];
            out.push(node.text.clone());
            for &child in &node.children {
                collect(arena, child, out);
            }
        }
        let mut parts = Vec::new();
        collect(self, node, &mut parts);
        normalize_whitespace(&parts.join(" "))
    }
}

/// In-memory page serving [`DomCapability`] and [`PageActions`]
#[derive(Debug)]
pub struct StaticDom {
    url: String,
    title: String,
    arena: RwLock<Arena>,
    actions: Mutex<Vec<ActionRecord>>,
    detached: AtomicBool,
}

impl StaticDom {
    pub fn from_spec(spec: PageSpec) -> Self {
        Self {
            url: spec.url,
            title: spec.title,
            arena: RwLock::new(Arena::build(spec.body)),
            actions: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
        }
    }

    /// Page at `about:blank` with the given body children
    pub fn with_body(body: Vec<NodeSpec>) -> Self {
        Self::from_spec(PageSpec::new(body))
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_spec(serde_json::from_str(json)?))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Make every query fail as if the page had been closed
    pub fn set_detached(&self, detached: bool) {
        self.detached.store(detached, Ordering::SeqCst);
    }

    /// Interactions performed so far, oldest first
    pub fn actions(&self) -> Vec<ActionRecord> {
        self.actions.lock().clone()
    }

    /// Current value of the first element matching `selector`
    pub fn input_value(&self, selector: &str) -> Result<Option<String>, DomError> {
        self.ensure_attached()?;
        let arena = self.arena.read();
        Ok(arena
            .query(selector)?
            .first()
            .map(|&idx| arena.nodes[idx].value.clone()))
    }

    /// Checked state of the first element matching `selector`
    pub fn is_checked(&self, selector: &str) -> Result<Option<bool>, DomError> {
        self.ensure_attached()?;
        let arena = self.arena.read();
        Ok(arena
            .query(selector)?
            .first()
            .map(|&idx| arena.nodes[idx].checked))
    }

    /// Set an attribute on every match; returns the number of elements changed
    pub fn set_attribute(&self, selector: &str, name: &str, value: &str) -> Result<usize, DomError> {
        self.ensure_attached()?;
        let mut arena = self.arena.write();
        let matches = arena.query(selector)?;
        for &idx in &matches {
            arena.nodes[idx]
                .attributes
                .insert(name.to_ascii_lowercase(), value.to_string());
        }
        Ok(matches.len())
    }

    /// Remove an attribute from every match; returns the number of elements matched
    pub fn remove_attribute(&self, selector: &str, name: &str) -> Result<usize, DomError> {
        self.ensure_attached()?;
        let mut arena = self.arena.write();
        let matches = arena.query(selector)?;
        for &idx in &matches {
            arena.nodes[idx].attributes.remove(&name.to_ascii_lowercase());
        }
        Ok(matches.len())
    }

    pub fn set_visible(&self, selector: &str, visible: bool) -> Result<usize, DomError> {
        self.ensure_attached()?;
        let mut arena = self.arena.write();
        let matches = arena.query(selector)?;
        for &idx in &matches {
            arena.nodes[idx].visible = visible;
        }
        Ok(matches.len())
    }

    fn ensure_attached(&self) -> Result<(), DomError> {
        if self.detached.load(Ordering::SeqCst) {
            return Err(DomError::Detached(self.url.clone()));
        }
        Ok(())
    }

    fn node_index(&self, arena: &Arena, handle: &ElementHandle) -> Result<usize, DomError> {
        handle
            .id
            .strip_prefix(HANDLE_PREFIX)
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|&idx| idx < arena.nodes.len())
            .ok_or_else(|| DomError::StaleElement(handle.id.clone()))
    }

    fn handle(idx: usize) -> ElementHandle {
        ElementHandle::new(format!("{}{}", HANDLE_PREFIX, idx))
    }

    fn record(&self, selector: &str, op: &ElementOp, idx: usize) {
        self.actions.lock().push(ActionRecord {
            selector: selector.to_string(),
            op: op.name().to_string(),
            element: Self::handle(idx),
        });
    }

    fn interact(
        &self,
        arena: &mut Arena,
        selector: &str,
        idx: usize,
        op: &ElementOp,
    ) -> Result<OpOutput, DomError> {
        if !arena.is_rendered(idx) {
            return Err(DomError::not_interactable(selector, "element is not visible"));
        }
        let needs_enabled = !matches!(op, ElementOp::Hover | ElementOp::Focus);
        if needs_enabled && !arena.nodes[idx].enabled {
            return Err(DomError::not_interactable(selector, "element is disabled"));
        }

        let tag = arena.nodes[idx].tag.clone();
        let editable = tag == "input" || tag == "textarea";
        match op {
            ElementOp::Click | ElementOp::Hover | ElementOp::Press(_) => {}
            ElementOp::Focus => arena.focused = Some(idx),
            ElementOp::Fill(value) => {
                if !editable {
                    return Err(DomError::not_interactable(selector, "element is not editable"));
                }
                arena.nodes[idx].value = value.clone();
            }
            ElementOp::Type(value) => {
                if !editable {
                    return Err(DomError::not_interactable(selector, "element is not editable"));
                }
                arena.nodes[idx].value.push_str(value);
            }
            ElementOp::Clear => {
                if !editable {
                    return Err(DomError::not_interactable(selector, "element is not editable"));
                }
                arena.nodes[idx].value.clear();
            }
            ElementOp::Check | ElementOp::Uncheck => {
                let kind = arena.nodes[idx]
                    .attributes
                    .get("type")
                    .map(|t| t.to_ascii_lowercase())
                    .unwrap_or_default();
                if tag != "input" || !(kind == "checkbox" || kind == "radio") {
                    return Err(DomError::not_interactable(
                        selector,
                        "element is not a checkbox or radio",
                    ));
                }
                arena.nodes[idx].checked = matches!(op, ElementOp::Check);
            }
            ElementOp::SelectOption(wanted) => {
                if tag != "select" {
                    return Err(DomError::not_interactable(selector, "element is not a select"));
                }
                let option = arena.nodes[idx]
                    .children
                    .iter()
                    .copied()
                    .filter(|&child| arena.nodes[child].tag == "option")
                    .find(|&child| {
                        let node = &arena.nodes[child];
                        node.attributes.get("value") == Some(wanted)
                            || normalize_whitespace(&node.text) == *wanted
                    })
                    .ok_or_else(|| {
                        DomError::not_interactable(selector, format!("no option \"{}\"", wanted))
                    })?;
                let value = arena.nodes[option]
                    .attributes
                    .get("value")
                    .cloned()
                    .unwrap_or_else(|| normalize_whitespace(&arena.nodes[option].text));
                arena.nodes[idx].value = value;
            }
            _ => return Err(DomError::Evaluation(format!("{} is not an interaction", op))),
        }
        Ok(OpOutput::Unit)
    }
}

#[async_trait]
impl DomCapability for StaticDom {
    async fn locate_all(&self, selector: &str) -> Result<Vec<ElementHandle>, DomError> {
        self.ensure_attached()?;
        let arena = self.arena.read();
        Ok(arena.query(selector)?.into_iter().map(Self::handle).collect())
    }

    async fn is_visible(
        &self,
        element: &ElementHandle,
        _timeout: Duration,
    ) -> Result<bool, DomError> {
        self.ensure_attached()?;
        let arena = self.arena.read();
        let idx = self.node_index(&arena, element)?;
        Ok(arena.is_rendered(idx))
    }

    async fn get_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DomError> {
        self.ensure_attached()?;
        let arena = self.arena.read();
        let idx = self.node_index(&arena, element)?;
        Ok(arena.nodes[idx]
            .attributes
            .get(&name.to_ascii_lowercase())
            .cloned())
    }

    async fn inner_text(&self, element: &ElementHandle) -> Result<String, DomError> {
        self.ensure_attached()?;
        let arena = self.arena.read();
        let idx = self.node_index(&arena, element)?;
        Ok(arena.rendered_text(idx))
    }

    async fn describe(&self, element: &ElementHandle) -> Result<ElementInfo, DomError> {
        self.ensure_attached()?;
        let arena = self.arena.read();
        let idx = self.node_index(&arena, element)?;
        Ok(arena.describe(idx))
    }

    async fn page_context(&self) -> Result<PageContext, DomError> {
        self.ensure_attached()?;
        let arena = self.arena.read();

        let interactive = (0..arena.nodes.len())
            .filter(|&idx| arena.is_descendant_of(idx, BODY) && arena.is_interactive(idx))
            .filter_map(|idx| {
                let node = &arena.nodes[idx];
                let text = truncate_chars(&arena.text(idx), INTERACTIVE_TEXT_CHARS);
                let id = node.attributes.get("id").cloned();
                let classes = arena.classes(idx);
                if text.is_empty() && id.is_none() && classes.is_empty() {
                    return None;
                }
                Some(InteractiveElement {
                    tag: node.tag.clone(),
                    text,
                    id,
                    classes,
                    role: node.attributes.get("role").cloned(),
                    input_type: node.attributes.get("type").cloned(),
                })
            })
            .take(PAGE_CONTEXT_MAX_INTERACTIVE)
            .collect();

        Ok(PageContext {
            url: self.url.clone(),
            title: self.title.clone(),
            body_text: truncate_chars(&arena.rendered_text(BODY), PAGE_CONTEXT_BODY_CHARS),
            interactive,
        })
    }
}

#[async_trait]
impl PageActions for StaticDom {
    async fn perform(&self, selector: &str, op: &ElementOp) -> Result<OpOutput, DomError> {
        self.ensure_attached()?;
        debug!(selector = %selector, op = %op, "static page operation");

        let mut arena = self.arena.write();
        let matches = arena.query(selector)?;
        let first = matches.first().copied();

        match op {
            ElementOp::IsVisible => {
                return Ok(OpOutput::Bool(first.is_some_and(|idx| arena.is_rendered(idx))))
            }
            ElementOp::IsHidden => {
                return Ok(OpOutput::Bool(!first.is_some_and(|idx| arena.is_rendered(idx))))
            }
            ElementOp::WaitForSelector { timeout } => {
                return if matches.iter().any(|&idx| arena.is_rendered(idx)) {
                    Ok(OpOutput::Unit)
                } else {
                    Err(DomError::Timeout {
                        selector: selector.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                };
            }
            _ => {}
        }

        let idx = first.ok_or_else(|| DomError::ElementNotFound(selector.to_string()))?;
        let output = match op {
            ElementOp::IsEnabled => OpOutput::Bool(arena.nodes[idx].enabled),
            ElementOp::IsDisabled => OpOutput::Bool(!arena.nodes[idx].enabled),
            ElementOp::TextContent => OpOutput::Text(Some(arena.text(idx))),
            ElementOp::InnerText => OpOutput::Text(Some(arena.rendered_text(idx))),
            ElementOp::InnerHtml => OpOutput::Text(Some(arena.inner_html(idx))),
            ElementOp::GetAttribute(name) => OpOutput::Text(
                arena.nodes[idx]
                    .attributes
                    .get(&name.to_ascii_lowercase())
                    .cloned(),
            ),
            ElementOp::Blur => {
                if arena.focused == Some(idx) {
                    arena.focused = None;
                }
                OpOutput::Unit
            }
            _ => self.interact(&mut arena, selector, idx, op)?,
        };

        if op.requires_interaction() || matches!(op, ElementOp::Blur) {
            self.record(selector, op, idx);
        }
        Ok(output)
    }
}
