//! The tool service: a schema-validated, audited dispatch surface.
//!
//! External callers (the dialog orchestrator) reach personas, prompts,
//! contents, evidence, analytics, and feedback exclusively through these
//! tools. Every call is validated, timed, hashed, and recorded in the trace
//! ledger.

pub mod error;
pub mod executor;
pub mod prompt;
pub mod registry;
pub mod schemas;
pub mod site_db;
pub mod site_store;

pub use error::ToolError;
pub use executor::{payload_hash, ToolExecutor};
pub use registry::{ToolDefinition, ToolRegistry};
pub use schemas::*;
pub use site_store::{NewNpcProfile, NewNpcPrompt, PromptRow, SiteStore};
