//! Shared foundation for the Loreline workspace: identifier newtypes, the
//! tenant/site scope, the workspace error type, and configuration loading.

pub mod config;
pub mod error;
pub mod types;

pub use error::{LorelineError, Result};
pub use types::*;
