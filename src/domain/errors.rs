// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Errors a caller may want to tell apart. Application code
// returns anyhow::Result and wraps these; use
// `err.downcast_ref::<ButlerError>()` to recover the variant.
//
//   DataFormat       — malformed dataset line, aborts the load
//   AdapterMismatch  — adapter does not fit the base model, aborts merge
//   Generation       — runtime failure while decoding a reply
//   AudioDecode      — unreadable or corrupt audio payload
//   InvalidConfig    — hyperparameters outside their valid range
//
// Truncation that cuts off a command tag is NOT an error; it is
// logged with tracing::warn! where it happens.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ButlerError {
    #[error("malformed dataset record at {}:{line}: {reason}", path.display())]
    DataFormat {
        path:   PathBuf,
        line:   usize,
        reason: String,
    },

    #[error("adapter does not match base model: {0}")]
    AdapterMismatch(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("cannot decode audio payload: {0}")]
    AudioDecode(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ButlerError {
    pub fn adapter_mismatch(msg: impl Into<String>) -> Self {
        ButlerError::AdapterMismatch(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        ButlerError::Generation(msg.into())
    }

    pub fn audio_decode(msg: impl Into<String>) -> Self {
        ButlerError::AudioDecode(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        ButlerError::InvalidConfig(msg.into())
    }
}
