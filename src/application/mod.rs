// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates the other layers to accomplish one
// goal per use case:
//
//   init_base_use_case   — scaffold a small base model + tokenizer
//   train_use_case       — fine-tune a LoRA adapter (optionally merge)
//   merge_use_case       — fold an adapter into a standalone model
//   chat_use_case        — one chat turn over the merged model
//   transcribe_use_case  — speech-to-text for an uploaded clip
//
// Rules for this layer:
//   - No tensor math here (that's Layer 5)
//   - No printing or HTTP types here (that's Layer 1 / server)
//   - No direct file formats here (that's Layer 4 and 6)
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

pub mod init_base_use_case;

pub mod train_use_case;

pub mod merge_use_case;

pub mod chat_use_case;

pub mod transcribe_use_case;
