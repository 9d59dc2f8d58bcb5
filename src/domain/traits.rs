// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Seams between the pipeline and its external collaborators.
// The application layer only sees these traits, so tests can
// swap in stubs without a model, a GPU or a speech engine.
//
//   SampleSource      — JsonlLoader reads training records
//   ReplyGenerator    — Inferencer turns a prompt into a reply
//   SpeechRecognizer  — CommandRecognizer turns audio into text
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

use crate::domain::chat::ChatMessage;
use crate::domain::sample::Sample;

// ─── SampleSource ─────────────────────────────────────────────────────────────
/// Anything that can produce the full list of training samples.
pub trait SampleSource {
    fn load_all(&self) -> Result<Vec<Sample>>;
}

// ─── ReplyGenerator ───────────────────────────────────────────────────────────
/// Produces the newly generated reply text for a fully assembled
/// message list (system prompt included).
///
/// Takes `&mut self`: implementations own device buffers and are
/// expected to be called one request at a time.
pub trait ReplyGenerator: Send {
    fn generate_reply(&mut self, messages: &[ChatMessage]) -> Result<String>;
}

// ─── SpeechRecognizer ─────────────────────────────────────────────────────────
/// The acoustic model. Receives mono 16 kHz samples in [-1, 1].
pub trait SpeechRecognizer: Send {
    fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<String>;
}
