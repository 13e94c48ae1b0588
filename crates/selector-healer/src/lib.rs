//! Self-healing selector resolution
//!
//! When a UI test's selector stops matching, the engine looks for a
//! replacement on the live page:
//! - [`DataTestIdRecovery`] - fuzzy match of test-id attributes
//! - [`TextContentMatching`] - visible elements with similar text
//! - [`CssHierarchyAnalysis`] - structural alternatives derived from the DOM
//! - [`AiPoweredAnalysis`] - suggestions from an Ollama-compatible model
//!
//! [`HealingEngine`] orders the strategies per selector, caches successes and
//! tracks flaky selectors. [`RetryHandler`] adds backoff retries and
//! [`HealingPage`] ties both to a [`dom_adapter::PageDriver`].

pub mod ai_backend;
pub mod config;
pub mod engine;
pub mod errors;
pub mod page;
pub mod retry;
pub mod similarity;
pub mod strategies;
pub mod types;

pub use ai_backend::OllamaClient;
pub use config::*;
pub use engine::*;
pub use errors::*;
pub use page::HealingPage;
pub use retry::*;
pub use strategies::*;
pub use types::*;
