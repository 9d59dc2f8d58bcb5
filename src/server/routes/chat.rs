//! Chat endpoint

use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{chat::ChatMessage, command_tag::CommandTag},
    server::{error::ApiError, state::ServerState},
};

/// Create chat router
pub fn create_router() -> Router<ServerState> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/", post(chat))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    /// Earlier turns, oldest first. The server keeps no session.
    #[serde(default)]
    history: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    reply:  String,
    action: Option<CommandTag>,
}

/// Generate one assistant reply
async fn chat(
    State(state): State<ServerState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let service = state.chat.clone();
    let reply = tokio::task::spawn_blocking(move || service.chat(&request.history, &request.message))
        .await??;

    Ok(Json(ChatResponse {
        reply:  reply.reply,
        action: reply.action,
    }))
}
