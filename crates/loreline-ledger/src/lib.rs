//! The trace ledger: every request leaves one replayable row.
//!
//! Writes are upserts keyed by `trace_id`: a partial row goes in at request
//! entry and the completion update fills in latency, tokens, and response.
//! The ledger also feeds the alert evaluator (windowed metrics) and the
//! experiment comparison view.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::LedgerError;
pub use store::{parse_window, to_unified, TraceStore};
pub use types::{MetricsSnapshot, ToolCallEntry, TraceFilter, TraceRecord, VariantSummary};
