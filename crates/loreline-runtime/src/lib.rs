//! Grounded dialog runtime.
//!
//! Composes persona, prompt, session memory, retrieval, the two-phase
//! evidence gate, the LLM provider, and output validation into one
//! per-request pipeline, and records every turn in the trace ledger.

pub mod followup;
pub mod runtime;
pub mod types;
pub mod validator;

pub use runtime::{DialogRuntime, RuntimeOptions};
pub use types::{ChatRequest, ChatResponse};
pub use validator::{OutputValidator, ValidationOutcome};
