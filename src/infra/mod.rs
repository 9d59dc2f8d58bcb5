// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the filesystem or external formats:
//
//   model_store.rs     — base / merged model directories
//                        (config.json + model.mpk.gz + tokenizer.json)
//
//   adapter_store.rs   — LoRA adapter directories
//                        (adapter_config.json + adapter_model.mpk.gz
//                         + training_config.json + tokenizer.json)
//
//   tokenizer_store.rs — tokenizer.json load/save, special-token
//                        ids and the bootstrap tokenizer
//
//   staging.rs         — write-then-rename for whole directories
//
//   metrics.rs         — per-epoch training metrics CSV
//
//   audio.rs           — uploaded audio → 16 kHz mono 30 s clip
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

/// Base and merged model persistence
pub mod model_store;

/// LoRA adapter persistence
pub mod adapter_store;

/// Tokenizer persistence and bootstrap vocabulary
pub mod tokenizer_store;

/// Atomic directory replacement
pub mod staging;

/// Training metrics CSV
pub mod metrics;

/// Audio payload decoding and resampling
pub mod audio;
