//! Element handles, snapshots and operation enums

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Opaque handle to an element located on a page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: String,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Tag and classes of an element's parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentInfo {
    pub tag: String,
    pub classes: Vec<String>,
}

/// One step of an element's ancestor chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorInfo {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
}

/// Structural snapshot of a single element.
///
/// Indices are 1-based like CSS `:nth-child`. `ancestors` runs nearest
/// first and stops below `body`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub role: Option<String>,
    pub text: String,
    pub parent: Option<ParentInfo>,
    pub sibling_count: usize,
    pub child_index: usize,
    pub type_index: usize,
    pub ancestors: Vec<AncestorInfo>,
}

impl ElementInfo {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn aria_label(&self) -> Option<&str> {
        self.attribute("aria-label")
    }
}

/// Interactive element summary included in a page context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub tag: String,
    pub text: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub role: Option<String>,
    #[serde(rename = "type")]
    pub input_type: Option<String>,
}

/// Page-level snapshot handed to AI analysis
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub body_text: String,
    pub interactive: Vec<InteractiveElement>,
}

/// Upper bound on body text carried by a [`PageContext`]
pub const PAGE_CONTEXT_BODY_CHARS: usize = 500;
/// Upper bound on interactive elements carried by a [`PageContext`]
pub const PAGE_CONTEXT_MAX_INTERACTIVE: usize = 50;
/// Upper bound on the text of each interactive element
pub const INTERACTIVE_TEXT_CHARS: usize = 50;

/// Element operations a test can perform through a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementOp {
    Click,
    Fill(String),
    Type(String),
    Press(String),
    Check,
    Uncheck,
    SelectOption(String),
    Hover,
    Focus,
    Blur,
    Clear,
    IsVisible,
    IsHidden,
    IsEnabled,
    IsDisabled,
    TextContent,
    InnerText,
    InnerHtml,
    GetAttribute(String),
    WaitForSelector { timeout: Duration },
}

impl ElementOp {
    pub fn name(&self) -> &'static str {
        match self {
            ElementOp::Click => "click",
            ElementOp::Fill(_) => "fill",
            ElementOp::Type(_) => "type",
            ElementOp::Press(_) => "press",
            ElementOp::Check => "check",
            ElementOp::Uncheck => "uncheck",
            ElementOp::SelectOption(_) => "selectOption",
            ElementOp::Hover => "hover",
            ElementOp::Focus => "focus",
            ElementOp::Blur => "blur",
            ElementOp::Clear => "clear",
            ElementOp::IsVisible => "isVisible",
            ElementOp::IsHidden => "isHidden",
            ElementOp::IsEnabled => "isEnabled",
            ElementOp::IsDisabled => "isDisabled",
            ElementOp::TextContent => "textContent",
            ElementOp::InnerText => "innerText",
            ElementOp::InnerHtml => "innerHTML",
            ElementOp::GetAttribute(_) => "getAttribute",
            ElementOp::WaitForSelector { .. } => "waitForSelector",
        }
    }

    /// Operations that mutate or need an interactable element
    pub fn requires_interaction(&self) -> bool {
        matches!(
            self,
            ElementOp::Click
                | ElementOp::Fill(_)
                | ElementOp::Type(_)
                | ElementOp::Press(_)
                | ElementOp::Check
                | ElementOp::Uncheck
                | ElementOp::SelectOption(_)
                | ElementOp::Hover
                | ElementOp::Focus
                | ElementOp::Clear
        )
    }
}

impl fmt::Display for ElementOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value produced by an [`ElementOp`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutput {
    Unit,
    Bool(bool),
    Text(Option<String>),
}

impl OpOutput {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OpOutput::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            OpOutput::Text(text) => text,
            _ => None,
        }
    }
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_names_and_interaction() {
        assert_eq!(ElementOp::Fill("x".into()).name(), "fill");
        assert!(ElementOp::Click.requires_interaction());
        assert!(!ElementOp::IsVisible.requires_interaction());
        assert!(!ElementOp::WaitForSelector {
            timeout: Duration::from_millis(10)
        }
        .requires_interaction());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }

    #[test]
    fn output_accessors() {
        assert_eq!(OpOutput::Bool(true).as_bool(), Some(true));
        assert_eq!(OpOutput::Unit.as_bool(), None);
        assert_eq!(
            OpOutput::Text(Some("hi".into())).into_text(),
            Some("hi".to_string())
        );
    }
}
