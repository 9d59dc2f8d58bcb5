// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between the dataset file and device tensors.
//
//   data.jsonl
//       │
//       ▼
//   JsonlLoader      → one Sample per non-blank line
//       │
//       ▼
//   SampleDataset    → in-memory samples, reshuffled every epoch
//       │
//       ▼
//   SampleBuilder    → chat template + tokenizer + loss masking
//       │
//       ▼
//   ChatBatcher      → right-padded [batch, seq] tensors
//       │
//       ▼
//   training loop (Layer 5)
//
// ChatTemplate is shared with the serving side so prompts look
// the same at training and inference time.
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads JSONL question/answer records
pub mod loader;

/// ChatML prompt rendering
pub mod template;

/// Sample → loss-masked EncodedExample
pub mod sample_builder;

/// In-memory samples with per-epoch shuffled batches
pub mod dataset;

/// Pads and stacks examples into tensors
pub mod batcher;
