//! SelfHeal command line library
//!
//! The `selfheal` binary is a thin shell over [`cli::app::run`]; the modules
//! are exposed for integration testing.

pub mod cli;
