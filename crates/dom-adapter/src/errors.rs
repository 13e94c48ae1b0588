//! Error types for the DOM capability

use thiserror::Error;

/// Errors surfaced by a DOM capability implementation.
///
/// The display strings follow the wording browser drivers use ("element not
/// found", "timeout ... exceeded while waiting for selector") so that callers
/// classifying failures by message see the same shapes as with a real driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    /// Selector could not be parsed
    #[error("invalid selector \"{selector}\": {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// Selector parsed but matched nothing when an element was required
    #[error("element not found for selector \"{0}\"")]
    ElementNotFound(String),

    /// Waiting for an element ran out of time
    #[error("timeout {timeout_ms}ms exceeded while waiting for selector \"{selector}\"")]
    Timeout { selector: String, timeout_ms: u64 },

    /// Element handle no longer refers to a live node
    #[error("stale element handle: {0}")]
    StaleElement(String),

    /// Element exists but cannot receive the operation (hidden, disabled)
    #[error("element not interactable for selector \"{selector}\": {reason}")]
    NotInteractable { selector: String, reason: String },

    /// Page or frame went away
    #[error("page detached: {0}")]
    Detached(String),

    /// Script/snapshot evaluation failed inside the page
    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

impl DomError {
    pub fn invalid_selector(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            reason: reason.into(),
        }
    }

    pub fn not_interactable(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotInteractable {
            selector: selector.into(),
            reason: reason.into(),
        }
    }

    /// Faults of the page itself rather than of one selector or element.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, DomError::Detached(_) | DomError::Evaluation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_follow_driver_wording() {
        let err = DomError::ElementNotFound(".login".to_string());
        assert_eq!(err.to_string(), "element not found for selector \".login\"");

        let err = DomError::Timeout {
            selector: "#go".to_string(),
            timeout_ms: 500,
        };
        assert!(err.to_string().contains("exceeded while waiting"));
    }

    #[test]
    fn infrastructure_classification() {
        assert!(DomError::Detached("closed".into()).is_infrastructure());
        assert!(DomError::Evaluation("boom".into()).is_infrastructure());
        assert!(!DomError::ElementNotFound("x".into()).is_infrastructure());
        assert!(!DomError::invalid_selector("[", "unterminated").is_infrastructure());
    }
}
