//! HTTP gateway: the external surface of the orchestration core.
//!
//! Exposes the tool RPC, the dialog endpoint, trace replay, session
//! management, the control plane, and the alert surface on one axum router
//! over a shared `AppState`.

pub mod app;
pub mod http;

pub use app::{build_router, AppState};
