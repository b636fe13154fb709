//! Consumer-side companion of the tool service.
//!
//! Wraps tool RPC with per-tool policy: timeout, bounded retries with
//! exponential backoff, read-through caching for safe reads, and an audit
//! buffer the dialog runtime flushes into the trace. Exceptions never cross
//! the public contract; failures come back as typed results.

pub mod client;
pub mod config;
pub mod transport;

pub use client::{ResilientToolClient, ToolCallAudit, ToolCallResult};
pub use config::{tool_config, ToolConfig, ToolPriority};
pub use transport::{HttpTransport, LocalTransport, ToolTransport, TransportError};
