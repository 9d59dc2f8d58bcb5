// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the adapter fine-tuning pipeline in order:
//
//   Step 1: Validate the configuration     (Layer 2)
//   Step 2: Load the JSONL dataset         (Layer 4 - data)
//   Step 3: Load the frozen base model     (Layer 6 - infra)
//   Step 4: Build the sample builder       (Layer 4 - data)
//   Step 5: Run the training loop          (Layer 5 - ml)
//           → adapter saved every epoch    (Layer 6 - infra)
//   Step 6: Optionally merge into a model  (Layer 2 - MergeUseCase)
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::application::merge_use_case::{MergeReport, MergeUseCase};
use crate::data::{dataset::SampleDataset, loader::JsonlLoader, sample_builder::{SampleBuilder, MAX_SEQ_TOKENS}};
use crate::domain::{errors::ButlerError, traits::SampleSource};
use crate::infra::{adapter_store::AdapterStore, model_store::ModelStore};
use crate::ml::{
    lora::LoraConfig,
    trainer::train_adapter,
    ComputeDevice, CpuAutodiff, GpuAutodiff,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Saved next to the adapter as training_config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub dataset:       PathBuf,
    pub base_model:    PathBuf,
    pub adapter_dir:   PathBuf,
    pub log_dir:       PathBuf,
    pub epochs:        usize,
    pub learning_rate: f64,
    pub batch_size:    usize,
    /// Per-side token limit for prompt and answer.
    pub max_len:       usize,
    pub seed:          u64,
    pub lora:          LoraConfig,
    pub device:        ComputeDevice,
    /// Merge the finished adapter into a full model at this path.
    #[serde(default)]
    pub merge_into:    Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dataset:       PathBuf::from("data/train.jsonl"),
            base_model:    PathBuf::from("models/base"),
            adapter_dir:   PathBuf::from("output/adapter"),
            log_dir:       PathBuf::from("output/logs"),
            epochs:        3,
            learning_rate: 1e-4,
            batch_size:    1,
            max_len:       MAX_SEQ_TOKENS,
            seed:          42,
            lora:          LoraConfig::default(),
            device:        ComputeDevice::Cpu,
            merge_into:    None,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), ButlerError> {
        if self.epochs == 0 {
            return Err(ButlerError::invalid_config("epochs must be at least 1"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ButlerError::invalid_config("learning_rate must be a positive number"));
        }
        if self.batch_size == 0 {
            return Err(ButlerError::invalid_config("batch_size must be at least 1"));
        }
        if self.max_len == 0 {
            return Err(ButlerError::invalid_config("max_len must be at least 1"));
        }
        self.lora.validate()
    }

    /// Longest encoded example: prompt + answer + terminator.
    pub fn max_sequence(&self) -> usize {
        2 * self.max_len + 1
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub samples:     usize,
    pub final_loss:  f64,
    pub adapter_dir: PathBuf,
    pub merged:      Option<MergeReport>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainReport> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Load the dataset ──────────────────────────────────────────
        tracing::info!("Loading dataset from '{}'", cfg.dataset.display());
        let samples = JsonlLoader::new(&cfg.dataset).load_all()?;
        if samples.is_empty() {
            return Err(ButlerError::invalid_config(format!(
                "dataset '{}' contains no samples",
                cfg.dataset.display()
            ))
            .into());
        }
        tracing::info!("Loaded {} samples", samples.len());
        let dataset = SampleDataset::new(samples);

        // ── Steps 3-5 run on the chosen backend ───────────────────────────────
        let final_loss = match cfg.device {
            ComputeDevice::Cpu  => self.train_on::<CpuAutodiff>(&dataset, Default::default())?,
            ComputeDevice::Wgpu => {
                let device = burn::backend::wgpu::WgpuDevice::default();
                tracing::info!("Using WGPU device: {:?}", device);
                self.train_on::<GpuAutodiff>(&dataset, device)?
            }
        };

        // ── Step 6: Optional merge ────────────────────────────────────────────
        let merged = match &cfg.merge_into {
            Some(dest) => Some(
                MergeUseCase::new(&cfg.base_model, &cfg.adapter_dir, dest)
                    .execute()
                    .context("Training finished but merging the adapter failed")?,
            ),
            None => None,
        };

        Ok(TrainReport {
            samples: dataset.len(),
            final_loss,
            adapter_dir: cfg.adapter_dir.clone(),
            merged,
        })
    }

    fn train_on<B: AutodiffBackend>(&self, dataset: &SampleDataset, device: B::Device) -> Result<f64> {
        let cfg = &self.config;

        // ── Step 3: Load the frozen base ──────────────────────────────────────
        let base = ModelStore::new(&cfg.base_model)
            .load::<B>(&device)
            .with_context(|| format!("Cannot load base model from '{}'", cfg.base_model.display()))?;
        if cfg.max_sequence() > base.config.max_position_embeddings {
            return Err(ButlerError::invalid_config(format!(
                "max_len {} needs {} positions, base model has {}",
                cfg.max_len,
                cfg.max_sequence(),
                base.config.max_position_embeddings
            ))
            .into());
        }

        // ── Step 4: Sample builder over the base tokenizer ────────────────────
        let builder = SampleBuilder::new(base.tokenizer, cfg.max_len)?;

        // ── Step 5: Training loop ─────────────────────────────────────────────
        let store   = AdapterStore::new(&cfg.adapter_dir);
        let outcome = train_adapter(cfg, &base.config, base.model, dataset, &builder, &store, &device)?;

        let final_loss = outcome.metrics.last().map(|m| m.train_loss).unwrap_or(f64::NAN);
        tracing::info!("Adapter written to '{}'", cfg.adapter_dir.display());
        Ok(final_loss)
    }
}
