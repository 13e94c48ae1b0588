//! Capability traits consumed by the healing engine

use crate::{
    errors::DomError,
    types::{ElementHandle, ElementInfo, ElementOp, OpOutput, PageContext},
};
use async_trait::async_trait;
use std::time::Duration;

/// Read-only DOM access.
///
/// Queries that match nothing return empty results rather than errors;
/// `Err` is reserved for invalid selectors and page-level faults.
#[async_trait]
pub trait DomCapability: Send + Sync {
    /// All elements matching `selector`, in document order
    async fn locate_all(&self, selector: &str) -> Result<Vec<ElementHandle>, DomError>;

    /// Number of elements matching `selector`
    async fn count(&self, selector: &str) -> Result<usize, DomError> {
        Ok(self.locate_all(selector).await?.len())
    }

    /// Whether the element is rendered, waiting up to `timeout`
    async fn is_visible(&self, element: &ElementHandle, timeout: Duration)
        -> Result<bool, DomError>;

    async fn get_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DomError>;

    /// Rendered text with whitespace collapsed
    async fn inner_text(&self, element: &ElementHandle) -> Result<String, DomError>;

    /// Structural snapshot of one element
    async fn describe(&self, element: &ElementHandle) -> Result<ElementInfo, DomError>;

    /// Snapshot of the page used to prompt AI analysis
    async fn page_context(&self) -> Result<PageContext, DomError>;
}

/// Element operations addressed by selector
#[async_trait]
pub trait PageActions: Send + Sync {
    async fn perform(&self, selector: &str, op: &ElementOp) -> Result<OpOutput, DomError>;
}

/// A page the healing facade can drive
pub trait PageDriver: DomCapability + PageActions {}

impl<T> PageDriver for T where T: DomCapability + PageActions + ?Sized {}

/// First element matching `selector`, if any
pub async fn first_match(
    dom: &dyn DomCapability,
    selector: &str,
) -> Result<Option<ElementHandle>, DomError> {
    Ok(dom.locate_all(selector).await?.into_iter().next())
}
