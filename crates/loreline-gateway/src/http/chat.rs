//! The public dialog endpoint: POST /v1/npc/chat.

use axum::{extract::State, Json};
use std::sync::Arc;

use loreline_runtime::{ChatRequest, ChatResponse};

use crate::app::AppState;
use crate::http::{bad_request, ErrorReply};

/// POST /v1/npc/chat
///
/// The runtime never errors mid-turn; failures come back as conservative
/// responses with a trace behind them. Only request-shape problems are
/// rejected here.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ErrorReply> {
    if let Err(reason) = request.validate() {
        return Err(bad_request(reason));
    }
    Ok(Json(state.runtime.chat(request).await))
}
