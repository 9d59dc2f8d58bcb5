//! Speech-to-text endpoint

use axum::{
    extract::{Json, Multipart, Query, State},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::server::{error::ApiError, state::ServerState};

/// Multipart field carrying the audio file.
pub const AUDIO_FIELD: &str = "audio";

/// Create speech-to-text router
pub fn create_router() -> Router<ServerState> {
    Router::new()
        .route("/stt", post(transcribe))
        .route("/stt/", post(transcribe))
}

#[derive(Debug, Deserialize)]
struct SttQuery {
    language: Option<String>,
}

#[derive(Debug, Serialize)]
struct SttResponse {
    text: String,
}

/// Transcribe an uploaded audio file
async fn transcribe(
    State(state): State<ServerState>,
    Query(query): Query<SttQuery>,
    mut multipart: Multipart,
) -> Result<Json<SttResponse>, ApiError> {
    let service = state
        .stt
        .clone()
        .ok_or_else(|| ApiError::unavailable("speech recognition is not configured"))?;

    let mut audio = None;
    while let Some(field) = multipart.next_field().await.map_err(ApiError::bad_request)? {
        if field.name() == Some(AUDIO_FIELD) {
            audio = Some(field.bytes().await.map_err(ApiError::bad_request)?);
            break;
        }
    }
    let audio = audio.ok_or_else(|| ApiError::bad_request(format!("missing '{AUDIO_FIELD}' field")))?;

    let text = tokio::task::spawn_blocking(move || service.transcribe(&audio, query.language.as_deref()))
        .await??;

    Ok(Json(SttResponse { text }))
}
