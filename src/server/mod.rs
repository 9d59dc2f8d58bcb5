//! Home-butler HTTP server
//!
//! This module provides the HTTP surface over the merged model:
//! - Chat at /chat/
//! - Speech-to-text at /stt/
//! - Health check at /health

use anyhow::Result;
use axum::{extract::DefaultBodyLimit, response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub mod error;
pub mod routes;
pub mod state;

use state::ServerState;

/// Create the main application router
pub fn create_app(state: ServerState) -> Router {
    let timeout_duration = state.config.request_timeout;
    let body_limit       = state.config.max_upload_bytes;

    Router::new()
        // Health check endpoint
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .merge(routes::chat::create_router())
        .merge(routes::stt::create_router())
        // Timeouts stop the response; a blocking generation still runs to completion
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::new(timeout_duration))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "home-butler",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Start the HTTP server and run until Ctrl-C
pub async fn start_server(state: ServerState) -> Result<()> {
    let addr: SocketAddr = state.config.addr;
    let speech = state.stt.is_some();
    let app = create_app(state);

    info!("Starting home-butler server on {}", addr);
    if !speech {
        info!("No speech recogniser configured; /stt/ will answer 503");
    }

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down gracefully"),
        Err(e) => {
            tracing::error!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}
