// ============================================================
// Layer 2 — InitBaseUseCase
// ============================================================
// Scaffolds a small, randomly initialised base model so the whole
// pipeline (train → merge → serve) can run without downloading a
// pretrained checkpoint:
//
//   Step 1: Load the dataset                  (Layer 4 - data)
//   Step 2: Build a bootstrap tokenizer over
//           dataset + system prompt + markers (Layer 6 - infra)
//   Step 3: Initialise CausalLm with a seed   (Layer 5 - ml)
//   Step 4: Write config/model/tokenizer      (Layer 6 - infra)
//
// A real deployment points `--base-model` at a converted
// pretrained directory instead and skips this command.

use anyhow::Result;
use burn::prelude::*;
use std::path::PathBuf;

use crate::data::loader::JsonlLoader;
use crate::domain::{errors::ButlerError, traits::SampleSource};
use crate::infra::{
    model_store::ModelStore,
    tokenizer_store::{bootstrap_extra_texts, TokenizerStore},
};
use crate::ml::{
    model::{CausalLm, CausalLmConfig},
    CpuBackend,
};

#[derive(Debug, Clone)]
pub struct InitBaseConfig {
    pub dataset:    PathBuf,
    pub output_dir: PathBuf,
    pub d_model:    usize,
    pub num_heads:  usize,
    pub num_layers: usize,
    pub d_ff:       usize,
    pub max_position_embeddings: usize,
    pub seed:       u64,
}

impl Default for InitBaseConfig {
    fn default() -> Self {
        Self {
            dataset:    PathBuf::from("data/train.jsonl"),
            output_dir: PathBuf::from("models/base"),
            d_model:    256,
            num_heads:  4,
            num_layers: 4,
            d_ff:       1024,
            max_position_embeddings: 2048,
            seed:       42,
        }
    }
}

impl InitBaseConfig {
    pub fn validate(&self) -> Result<(), ButlerError> {
        if self.num_heads == 0 || self.d_model % self.num_heads != 0 {
            return Err(ButlerError::invalid_config(format!(
                "d_model ({}) must be divisible by num_heads ({})",
                self.d_model, self.num_heads
            )));
        }
        if self.num_layers == 0 || self.d_ff == 0 || self.max_position_embeddings == 0 {
            return Err(ButlerError::invalid_config(
                "num_layers, d_ff and max_position_embeddings must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InitBaseReport {
    pub output_dir: PathBuf,
    pub vocab_size: usize,
}

pub struct InitBaseUseCase {
    config: InitBaseConfig,
}

impl InitBaseUseCase {
    pub fn new(config: InitBaseConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<InitBaseReport> {
        let cfg = &self.config;
        cfg.validate()?;

        // ── Step 1: Dataset text ──────────────────────────────────────────────
        let samples = JsonlLoader::new(&cfg.dataset).load_all()?;
        let mut texts: Vec<String> = samples
            .iter()
            .flat_map(|s| [s.question.clone(), s.answer.clone()])
            .collect();
        texts.extend(bootstrap_extra_texts());
        tracing::info!("Building bootstrap vocabulary from {} samples", samples.len());

        // ── Step 2: Tokenizer (built in scratch space, saved with the model) ──
        let scratch   = tempfile::tempdir()?;
        let tokenizer = TokenizerStore::new(scratch.path()).build_bootstrap(&texts)?;
        let vocab_size = tokenizer.get_vocab_size(true);

        // ── Step 3: Seeded initialisation ─────────────────────────────────────
        let device = Default::default();
        CpuBackend::seed(cfg.seed);
        let model_cfg = CausalLmConfig::new(vocab_size)
            .with_max_position_embeddings(cfg.max_position_embeddings)
            .with_d_model(cfg.d_model)
            .with_num_heads(cfg.num_heads)
            .with_num_layers(cfg.num_layers)
            .with_d_ff(cfg.d_ff);
        let model: CausalLm<CpuBackend> = model_cfg.init(&device);

        // ── Step 4: Persist ───────────────────────────────────────────────────
        ModelStore::new(&cfg.output_dir).save(&model, &model_cfg, &tokenizer)?;
        tracing::info!(
            "Base model initialised at '{}' (vocab={}, d_model={}, layers={})",
            cfg.output_dir.display(), vocab_size, cfg.d_model, cfg.num_layers
        );

        Ok(InitBaseReport { output_dir: cfg.output_dir.clone(), vocab_size })
    }
}
