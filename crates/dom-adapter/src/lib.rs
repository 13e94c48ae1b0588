//! DOM capability layer for the selector healer
//!
//! The healing engine never talks to a browser directly. Everything it needs
//! from a page is expressed by the traits in this crate:
//! - [`DomCapability`] - selector lookup, visibility, attributes and typed
//!   element/page snapshots
//! - [`PageActions`] - the enumerated element operations a test performs
//!
//! [`StaticDom`] is an in-memory page implementing both traits. It backs the
//! test suites and the `selfheal heal` command.

pub mod capability;
pub mod errors;
pub mod selector;
pub mod static_dom;
pub mod types;

pub use capability::*;
pub use errors::*;
pub use selector::Selector;
pub use static_dom::*;
pub use types::*;
