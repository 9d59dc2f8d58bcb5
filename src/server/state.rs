//! Server state management

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::application::{chat_use_case::ChatService, transcribe_use_case::TranscriptionService};

/// Listener and request limits for `serve`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr:             SocketAddr,
    pub request_timeout:  Duration,
    /// Largest accepted request body (audio uploads).
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr:             SocketAddr::from(([0, 0, 0, 0], 8000)),
            request_timeout:  Duration::from_secs(120),
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    /// Chat over the merged model
    pub chat: Arc<ChatService>,

    /// Speech-to-text; `None` when no recogniser is configured
    pub stt: Option<Arc<TranscriptionService>>,

    pub config: Arc<ServerConfig>,
}

impl ServerState {
    pub fn new(chat: ChatService, stt: Option<TranscriptionService>, config: ServerConfig) -> Self {
        Self {
            chat:   Arc::new(chat),
            stt:    stt.map(Arc::new),
            config: Arc::new(config),
        }
    }
}
