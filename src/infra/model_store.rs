// ============================================================
// Layer 6 — Model Store
// ============================================================
// Saves and restores a full model directory (base or merged):
//
//   models/base/
//     config.json      ← CausalLmConfig (architecture)
//     model.mpk.gz     ← all weights, NamedMpkGzFileRecorder
//     tokenizer.json   ← the tokenizer the weights were trained with
//
// The architecture is saved next to the weights because the model
// has to be rebuilt with the exact same shapes before the record
// can be loaded into it.
//
// Writes go through staging::replace_dir, so the directory is
// always either the previous model or the complete new one.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tokenizers::Tokenizer;

use crate::infra::{staging, tokenizer_store::TokenizerStore};
use crate::ml::model::{CausalLm, CausalLmConfig};

pub const CONFIG_FILE: &str = "config.json";
/// The recorder appends `.mpk.gz`.
pub const WEIGHTS_STEM: &str = "model";

pub type WeightsRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// A loaded model directory.
pub struct LoadedModel<B: Backend> {
    pub model:     CausalLm<B>,
    pub config:    CausalLmConfig,
    pub tokenizer: Tokenizer,
}

pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// True when config, weights and tokenizer are all present.
    pub fn is_complete(&self) -> bool {
        self.dir.join(CONFIG_FILE).is_file()
            && self.dir.join(format!("{WEIGHTS_STEM}.mpk.gz")).is_file()
            && TokenizerStore::new(&self.dir).path().is_file()
    }

    /// Write the whole directory, replacing any previous contents.
    pub fn save<B: Backend>(
        &self,
        model:     &CausalLm<B>,
        config:    &CausalLmConfig,
        tokenizer: &Tokenizer,
    ) -> Result<()> {
        staging::replace_dir(&self.dir, |staging| {
            write_config(staging, config)?;
            WeightsRecorder::new()
                .record(model.clone().into_record(), staging.join(WEIGHTS_STEM))
                .with_context(|| format!("Failed to write weights into '{}'", staging.display()))?;
            TokenizerStore::new(staging).save(tokenizer)
        })?;
        tracing::info!("Model saved to '{}'", self.dir.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<CausalLmConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read model config '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed model config '{}'", path.display()))
    }

    /// Rebuild the model from config.json and load its weights.
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<LoadedModel<B>> {
        let config = self.load_config()?;
        let path   = self.dir.join(WEIGHTS_STEM);
        let record = WeightsRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load weights '{}.mpk.gz'", path.display()))?;
        let model: CausalLm<B> = config.init(device);
        let model = model.load_record(record);
        let tokenizer = TokenizerStore::new(&self.dir).load()?;

        tracing::info!(
            "Model loaded from '{}': {} layers, d_model={}, vocab={}",
            self.dir.display(), config.num_layers, config.d_model, config.vocab_size
        );
        Ok(LoadedModel { model, config, tokenizer })
    }
}

fn write_config(dir: &Path, config: &CausalLmConfig) -> Result<()> {
    let path = dir.join(CONFIG_FILE);
    fs::write(&path, serde_json::to_string_pretty(config)?)
        .with_context(|| format!("Cannot write config to '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tokenizer_store::tests::test_tokenizer;
    use crate::ml::model::tests::{tiny_config, TestBackend};

    #[test]
    fn test_save_then_load_restores_weights() {
        let tok_dir = tempfile::tempdir().unwrap();
        let tok     = test_tokenizer(tok_dir.path());
        let root    = tempfile::tempdir().unwrap();
        let store   = ModelStore::new(root.path().join("base"));

        let device = Default::default();
        let config = tiny_config(tok.get_vocab_size(true));
        let model: CausalLm<TestBackend> = config.init(&device);
        store.save(&model, &config, &tok).unwrap();
        assert!(store.is_complete());

        let loaded = store.load::<TestBackend>(&device).unwrap();
        assert_eq!(loaded.config.d_model, config.d_model);
        loaded
            .model
            .lm_head
            .weight
            .val()
            .into_data()
            .assert_approx_eq(&model.lm_head.weight.val().into_data(), 6);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let root  = tempfile::tempdir().unwrap();
        let store = ModelStore::new(root.path().join("nothing"));
        assert!(!store.is_complete());
        assert!(store.load::<TestBackend>(&Default::default()).is_err());
    }
}
