// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, enums and traits that define the core
// concepts of the assistant. Nothing in here touches Burn,
// the tokenizer, the filesystem or the network.
//
// What lives here:
//
//   sample.rs       — a (question, answer) training record and
//                     its loss-masked encoded form
//   chat.rs         — chat roles and messages
//   command_tag.rs  — the closed vocabulary of device-control
//                     markers shared by training and serving
//   errors.rs       — the error taxonomy surfaced to callers
//   traits.rs       — seams to the external collaborators
//                     (reply generation, speech recognition)
//
// Reference: Rust Book §5 (Structs), §6 (Enums), §10 (Traits)

/// Training records and encoded examples
pub mod sample;

/// Chat roles and messages
pub mod chat;

/// Device-control command tags
pub mod command_tag;

/// Error taxonomy
pub mod errors;

/// Core abstractions (traits) that other layers implement
pub mod traits;
