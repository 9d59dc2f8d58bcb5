// ============================================================
// Layer 6 — Adapter Store
// ============================================================
// Persists a trained LoRA adapter as its own directory, separate
// from the frozen base model it was trained against:
//
//   output/adapter/
//     adapter_config.json    ← AdapterConfig: LoRA hyperparameters,
//                              base path + architecture, epochs done
//     adapter_model.mpk.gz   ← LoRA deltas only (AdapterModule record)
//     training_config.json   ← the TrainConfig of the run
//     tokenizer.json         ← tokenizer used to build the samples
//
// Every save rewrites the whole directory through a staging copy;
// saving the same adapter twice yields the same files.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use burn::{prelude::*, record::Recorder};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tokenizers::Tokenizer;

use crate::application::train_use_case::TrainConfig;
use crate::domain::errors::ButlerError;
use crate::infra::{model_store::WeightsRecorder, staging, tokenizer_store::TokenizerStore};
use crate::ml::lora::{self, AdapterModule, LoraConfig};
use crate::ml::model::{CausalLm, CausalLmConfig};

pub const ADAPTER_CONFIG_FILE:  &str = "adapter_config.json";
pub const ADAPTER_WEIGHTS_STEM: &str = "adapter_model";
pub const TRAINING_CONFIG_FILE: &str = "training_config.json";

/// Bumped whenever the on-disk adapter layout changes.
pub const ADAPTER_FORMAT_VERSION: u32 = 1;

/// Contents of adapter_config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub name:             String,
    pub format_version:   u32,
    pub base_model:       PathBuf,
    /// Architecture of the base the deltas were trained on.
    pub base:             CausalLmConfig,
    pub lora:             LoraConfig,
    pub epochs_completed: usize,
}

impl AdapterConfig {
    pub fn describe(train: &TrainConfig, base: &CausalLmConfig, epochs_completed: usize) -> Self {
        let name = train
            .adapter_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "adapter".to_string());
        Self {
            name,
            format_version: ADAPTER_FORMAT_VERSION,
            base_model: train.base_model.clone(),
            base: base.clone(),
            lora: train.lora.clone(),
            epochs_completed,
        }
    }

    /// Check that these deltas can be attached to a base with `base`'s shape.
    pub fn check_compatible(&self, base: &CausalLmConfig) -> Result<(), ButlerError> {
        if self.format_version != ADAPTER_FORMAT_VERSION {
            return Err(ButlerError::adapter_mismatch(format!(
                "adapter format version {} is not supported (expected {})",
                self.format_version, ADAPTER_FORMAT_VERSION
            )));
        }
        let checks = [
            ("num_layers", self.base.num_layers, base.num_layers),
            ("d_model",    self.base.d_model,    base.d_model),
            ("d_ff",       self.base.d_ff,       base.d_ff),
            ("vocab_size", self.base.vocab_size, base.vocab_size),
        ];
        for (field, adapter, actual) in checks {
            if adapter != actual {
                return Err(ButlerError::adapter_mismatch(format!(
                    "{field}: adapter was trained on {adapter}, base has {actual}"
                )));
            }
        }
        Ok(())
    }
}

pub struct AdapterStore {
    dir: PathBuf,
}

impl AdapterStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_complete(&self) -> bool {
        [ADAPTER_CONFIG_FILE, TRAINING_CONFIG_FILE]
            .iter()
            .all(|f| self.dir.join(f).is_file())
            && self.dir.join(format!("{ADAPTER_WEIGHTS_STEM}.mpk.gz")).is_file()
            && TokenizerStore::new(&self.dir).path().is_file()
    }

    pub fn save<B: Backend>(
        &self,
        adapters:  AdapterModule<B>,
        config:    &AdapterConfig,
        training:  &TrainConfig,
        tokenizer: &Tokenizer,
    ) -> Result<()> {
        staging::replace_dir(&self.dir, |staging| {
            write_json(&staging.join(ADAPTER_CONFIG_FILE), config)?;
            write_json(&staging.join(TRAINING_CONFIG_FILE), training)?;
            WeightsRecorder::new()
                .record(adapters.into_record(), staging.join(ADAPTER_WEIGHTS_STEM))
                .with_context(|| format!("Failed to write adapter weights into '{}'", staging.display()))?;
            TokenizerStore::new(staging).save(tokenizer)
        })?;
        tracing::debug!("Adapter written to '{}'", self.dir.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<AdapterConfig> {
        read_json(&self.dir.join(ADAPTER_CONFIG_FILE))
    }

    pub fn load_training_config(&self) -> Result<TrainConfig> {
        read_json(&self.dir.join(TRAINING_CONFIG_FILE))
    }

    /// Load the saved deltas, shaped for `base`.
    ///
    /// The record is loaded into a skeleton built by wrapping `base`
    /// with the saved LoRA config, so `config` must already have been
    /// checked against the base architecture.
    pub fn load_record<B: Backend>(
        &self,
        config: &AdapterConfig,
        base:   &CausalLm<B>,
        device: &B::Device,
    ) -> Result<AdapterModule<B>> {
        // Shapes only; every value is replaced by the record
        let skeleton = AdapterModule::extract(&lora::wrap(base.clone(), &config.lora, 0, device)?);
        let path     = self.dir.join(ADAPTER_WEIGHTS_STEM);
        let record   = WeightsRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load adapter weights '{}.mpk.gz'", path.display()))?;
        Ok(skeleton.load_record(record))
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Cannot write '{}'", path.display()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'. Has the adapter been trained?", path.display()))?;
    Ok(serde_json::from_str(&json).map_err(ButlerError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tokenizer_store::tests::test_tokenizer;
    use crate::ml::model::tests::{tiny_config, TestBackend};

    fn fixture(out: &Path) -> (Tokenizer, CausalLmConfig, CausalLm<TestBackend>, TrainConfig) {
        let tok_dir = out.join("tok");
        let tok     = test_tokenizer(&tok_dir);
        let config  = tiny_config(tok.get_vocab_size(true));
        let model   = config.init(&Default::default());
        let train   = TrainConfig { adapter_dir: out.join("adapter"), ..TrainConfig::default() };
        (tok, config, model, train)
    }

    fn file_bytes(dir: &Path) -> Vec<(String, Vec<u8>)> {
        let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(dir)
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (e.file_name().to_string_lossy().into_owned(), fs::read(e.path()).unwrap())
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_save_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let (tok, base_cfg, base, train) = fixture(root.path());
        let device  = Default::default();
        let wrapped = lora::wrap(base, &train.lora, train.seed, &device).unwrap();
        let store   = AdapterStore::new(&train.adapter_dir);
        let meta    = AdapterConfig::describe(&train, &base_cfg, 1);

        store.save(AdapterModule::extract(&wrapped), &meta, &train, &tok).unwrap();
        let first = file_bytes(store.dir());
        store.save(AdapterModule::extract(&wrapped), &meta, &train, &tok).unwrap();
        let second = file_bytes(store.dir());

        assert!(store.is_complete());
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
    }

    #[test]
    fn test_round_trip_restores_deltas() {
        let root = tempfile::tempdir().unwrap();
        let (tok, base_cfg, base, train) = fixture(root.path());
        let device  = Default::default();
        let wrapped = lora::wrap(base.clone(), &train.lora, train.seed, &device).unwrap();
        let store   = AdapterStore::new(&train.adapter_dir);
        store
            .save(AdapterModule::extract(&wrapped), &AdapterConfig::describe(&train, &base_cfg, 3), &train, &tok)
            .unwrap();

        let meta = store.load_config().unwrap();
        assert_eq!(meta.epochs_completed, 3);
        assert_eq!(meta.name, "adapter");
        meta.check_compatible(&base_cfg).unwrap();
        assert_eq!(store.load_training_config().unwrap().lora, train.lora);

        let loaded   = store.load_record(&meta, &base, &device).unwrap();
        let original = AdapterModule::extract(&wrapped);
        let a = |m: &AdapterModule<TestBackend>| {
            m.layers[0].q_proj.as_ref().unwrap().lora_a.val().into_data()
        };
        a(&loaded).assert_approx_eq(&a(&original), 6);
    }

    #[test]
    fn test_incompatible_base_is_adapter_mismatch() {
        let root = tempfile::tempdir().unwrap();
        let (_tok, base_cfg, _base, train) = fixture(root.path());
        let meta  = AdapterConfig::describe(&train, &base_cfg, 1);
        let wider = base_cfg.clone().with_d_model(32);
        assert!(matches!(meta.check_compatible(&wider), Err(ButlerError::AdapterMismatch(_))));
        let deeper = base_cfg.with_num_layers(5);
        assert!(matches!(meta.check_compatible(&deeper), Err(ButlerError::AdapterMismatch(_))));
    }
}
