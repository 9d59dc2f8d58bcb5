// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn model code lives here:
//
//   model.rs      — Decoder-only causal LM whose projections
//                   (q/k/v/o, gate/up/down) can carry LoRA deltas
//
//   lora.rs       — LoRA deltas, adapter extraction/attachment
//                   and merging into the base weights
//
//   trainer.rs    — Adapter fine-tuning loop: shuffled batches,
//                   masked causal LM loss, AdamW on the deltas,
//                   adapter saved at every epoch boundary
//
//   inferencer.rs — Greedy reply generation behind the
//                   ReplyGenerator trait
//
// Backends are chosen at run time through ComputeDevice:
//   cpu  → NdArray
//   wgpu → Wgpu
// Training wraps either in Autodiff.
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

use serde::{Deserialize, Serialize};

/// Decoder-only transformer with LoRA-capable projections
pub mod model;

/// Low-rank adapters: wrap, extract, attach, merge
pub mod lora;

/// Adapter fine-tuning loop
pub mod trainer;

/// Autoregressive reply generation
pub mod inferencer;

pub type CpuBackend   = burn::backend::NdArray;
pub type GpuBackend   = burn::backend::Wgpu;
pub type CpuAutodiff  = burn::backend::Autodiff<CpuBackend>;
pub type GpuAutodiff  = burn::backend::Autodiff<GpuBackend>;

/// Where tensors live for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    #[default]
    Cpu,
    Wgpu,
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeDevice::Cpu  => write!(f, "cpu"),
            ComputeDevice::Wgpu => write!(f, "wgpu"),
        }
    }
}
