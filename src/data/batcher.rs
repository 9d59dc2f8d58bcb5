// ============================================================
// Layer 4 — Chat Batcher
// ============================================================
// Stacks a Vec<EncodedExample> into device tensors.
//
// Examples in a batch have different lengths, so every row is
// right-padded to the longest one:
//
//   input_ids       pad id
//   attention_mask  0
//   labels          IGNORE_INDEX  (padding never reaches the loss)
//
//   Input:  N examples of lengths L1..LN
//   Output: ChatBatch with [N, max(Li)] tensors
//
// Reference: Burn Book §4 (Batcher)

use burn::prelude::*;

use crate::domain::sample::{EncodedExample, IGNORE_INDEX};

// ─── ChatBatch ────────────────────────────────────────────────────────────────
/// A padded batch ready for the forward pass.
#[derive(Debug, Clone)]
pub struct ChatBatch<B: Backend> {
    /// Token ids — shape: [batch_size, seq_len]
    pub input_ids: Tensor<B, 2, Int>,

    /// 1 = real token, 0 = padding — shape: [batch_size, seq_len]
    pub attention_mask: Tensor<B, 2, Int>,

    /// Target ids or IGNORE_INDEX — shape: [batch_size, seq_len]
    pub labels: Tensor<B, 2, Int>,
}

// ─── ChatBatcher ──────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct ChatBatcher<B: Backend> {
    pub device: B::Device,
    pad_id:     u32,
}

impl<B: Backend> ChatBatcher<B> {
    pub fn new(device: B::Device, pad_id: u32) -> Self {
        Self { device, pad_id }
    }

    pub fn batch(&self, items: &[EncodedExample]) -> ChatBatch<B> {
        let batch_size = items.len();
        let seq_len    = items.iter().map(EncodedExample::len).max().unwrap_or(0);

        let mut ids    = Vec::with_capacity(batch_size * seq_len);
        let mut mask   = Vec::with_capacity(batch_size * seq_len);
        let mut labels = Vec::with_capacity(batch_size * seq_len);

        for ex in items {
            let pad = seq_len - ex.len();

            ids.extend(ex.input_ids.iter().map(|&x| x as i32));
            ids.extend(std::iter::repeat(self.pad_id as i32).take(pad));

            mask.extend(ex.attention_mask.iter().map(|&x| x as i32));
            mask.extend(std::iter::repeat(0).take(pad));

            labels.extend(ex.labels.iter().map(|&x| x as i32));
            labels.extend(std::iter::repeat(IGNORE_INDEX as i32).take(pad));
        }

        let to_tensor = |flat: Vec<i32>| {
            Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device)
                .reshape([batch_size, seq_len])
        };

        ChatBatch {
            input_ids:      to_tensor(ids),
            attention_mask: to_tensor(mask),
            labels:         to_tensor(labels),
        }
    }
}
