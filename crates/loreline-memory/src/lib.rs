//! Per-session conversation memory.
//!
//! Two records per `(tenant, site, session)`: an NPC-isolated short-memory
//! ring (bounded by message count and total characters, TTL-expired) and a
//! cross-NPC preference record that carries user choices only. Memory is an
//! influence on style and context, never a fact source.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::MemoryError;
pub use store::{build_context_prompt, MemoryLimits, MemoryStore};
pub use types::{Message, Preference, SessionSummary, SummaryMessage};
