// ============================================================
// Layer 2 — MergeUseCase
// ============================================================
// Folds a trained adapter into a fresh copy of its base model and
// writes the result as a standalone model directory:
//
//   Step 1: Reload the base from disk         (never the training copy)
//   Step 2: Read adapter_config.json and check it against the base
//           layer count / hidden size / target names → AdapterMismatch
//   Step 3: Load the deltas and attach them
//   Step 4: W' = W + A·B·(alpha/rank) for every delta, drop the deltas
//   Step 5: Write model + tokenizer through a staging directory
//
// Runs on the NdArray backend so the same inputs always give
// bit-identical weights. Base and adapter directories are only read.
//
// Reference: Hu et al. (2021) LoRA, §4.1 (no additional inference latency)

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::domain::errors::ButlerError;
use crate::infra::{adapter_store::AdapterStore, model_store::ModelStore};
use crate::ml::{
    lora::{self, AdapterModule},
    CpuBackend,
};

#[derive(Debug, Clone)]
pub struct MergeReport {
    pub output_dir:         PathBuf,
    pub merged_projections: usize,
    pub epochs_completed:   usize,
}

pub struct MergeUseCase {
    base_dir:    PathBuf,
    adapter_dir: PathBuf,
    output_dir:  PathBuf,
}

impl MergeUseCase {
    pub fn new(
        base_dir:    impl Into<PathBuf>,
        adapter_dir: impl Into<PathBuf>,
        output_dir:  impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_dir:    base_dir.into(),
            adapter_dir: adapter_dir.into(),
            output_dir:  output_dir.into(),
        }
    }

    pub fn execute(&self) -> Result<MergeReport> {
        self.check_paths()?;
        let device = Default::default();

        // ── Step 1: Fresh base ────────────────────────────────────────────────
        let base = ModelStore::new(&self.base_dir)
            .load::<CpuBackend>(&device)
            .with_context(|| format!("Cannot load base model from '{}'", self.base_dir.display()))?;

        // ── Step 2: Architecture check ────────────────────────────────────────
        let adapter_store = AdapterStore::new(&self.adapter_dir);
        let meta = adapter_store
            .load_config()
            .with_context(|| format!("Cannot read adapter from '{}'", self.adapter_dir.display()))?;
        meta.check_compatible(&base.config)?;
        tracing::info!(
            "Merging adapter '{}' (rank={}, {} epochs) into '{}'",
            meta.name, meta.lora.rank, meta.epochs_completed, self.base_dir.display()
        );

        // ── Step 3: Attach ────────────────────────────────────────────────────
        let adapters = adapter_store.load_record(&meta, &base.model, &device)?;
        let merged_projections = adapters.num_deltas();
        let model = lora::attach(base.model, adapters)?;

        // ── Step 4: Fold ──────────────────────────────────────────────────────
        let merged = model.merge_adapters();
        debug_assert_eq!(AdapterModule::extract(&merged).num_deltas(), 0);

        // ── Step 5: Write ─────────────────────────────────────────────────────
        ModelStore::new(&self.output_dir).save(&merged, &base.config, &base.tokenizer)?;
        tracing::info!(
            "Merged {} projections into '{}'",
            merged_projections,
            self.output_dir.display()
        );

        Ok(MergeReport {
            output_dir: self.output_dir.clone(),
            merged_projections,
            epochs_completed: meta.epochs_completed,
        })
    }

    /// The destination must not be one of the inputs.
    fn check_paths(&self) -> Result<(), ButlerError> {
        let same = |a: &Path, b: &Path| match (a.canonicalize(), b.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => a == b,
        };
        if same(&self.output_dir, &self.base_dir) || same(&self.output_dir, &self.adapter_dir) {
            return Err(ButlerError::invalid_config(format!(
                "merge output '{}' would overwrite an input directory",
                self.output_dir.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::TrainConfig;
    use crate::infra::adapter_store::AdapterConfig;
    use crate::infra::tokenizer_store::tests::test_tokenizer;
    use crate::ml::lora::LoraConfig;
    use crate::ml::model::tests::tiny_config;
    use crate::ml::model::CausalLm;
    use burn::{module::Param, prelude::*, tensor::Distribution};
    use std::fs;

    /// Base dir + an adapter with non-zero B factors.
    fn fixture(root: &Path) -> (PathBuf, PathBuf) {
        let device = Default::default();
        let tok    = test_tokenizer(&root.join("tok"));
        let config = tiny_config(tok.get_vocab_size(true));
        let base: CausalLm<CpuBackend> = config.init(&device);
        let base_dir = root.join("base");
        ModelStore::new(&base_dir).save(&base, &config, &tok).unwrap();

        let train = TrainConfig {
            base_model:  base_dir.clone(),
            adapter_dir: root.join("adapter"),
            lora:        LoraConfig { rank: 2, dropout: 0.0, ..LoraConfig::default() },
            ..TrainConfig::default()
        };
        let mut wrapped = lora::wrap(base, &train.lora, train.seed, &device).unwrap();
        for block in wrapped.layers.iter_mut() {
            if let Some(delta) = block.attn.q_proj.lora.as_mut() {
                let dims = delta.lora_b.val().dims();
                delta.lora_b = Param::from_tensor(Tensor::random(dims, Distribution::Uniform(-1.0, 1.0), &device));
            }
        }
        AdapterStore::new(&train.adapter_dir)
            .save(AdapterModule::extract(&wrapped), &AdapterConfig::describe(&train, &config, 1), &train, &tok)
            .unwrap();
        (base_dir, train.adapter_dir)
    }

    fn weights(dir: &Path) -> Vec<f32> {
        let loaded = ModelStore::new(dir).load::<CpuBackend>(&Default::default()).unwrap();
        loaded.model.layers[0].attn.q_proj.base.weight.val().into_data().to_vec().unwrap()
    }

    #[test]
    fn test_merge_is_deterministic_and_changes_targets() {
        let root = tempfile::tempdir().unwrap();
        let (base_dir, adapter_dir) = fixture(root.path());

        let a = MergeUseCase::new(&base_dir, &adapter_dir, root.path().join("m1")).execute().unwrap();
        let b = MergeUseCase::new(&base_dir, &adapter_dir, root.path().join("m2")).execute().unwrap();
        assert_eq!(a.merged_projections, 14);
        assert_eq!(b.merged_projections, a.merged_projections);

        let w1 = weights(&root.path().join("m1"));
        assert_eq!(w1, weights(&root.path().join("m2")));
        assert_ne!(w1, weights(&base_dir));
    }

    #[test]
    fn test_inputs_are_left_untouched() {
        let root = tempfile::tempdir().unwrap();
        let (base_dir, adapter_dir) = fixture(root.path());
        let before = fs::read(base_dir.join("model.mpk.gz")).unwrap();
        let adapter_before = fs::read(adapter_dir.join("adapter_model.mpk.gz")).unwrap();

        MergeUseCase::new(&base_dir, &adapter_dir, root.path().join("merged")).execute().unwrap();

        assert_eq!(fs::read(base_dir.join("model.mpk.gz")).unwrap(), before);
        assert_eq!(fs::read(adapter_dir.join("adapter_model.mpk.gz")).unwrap(), adapter_before);
    }

    #[test]
    fn test_mismatched_base_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let (_base_dir, adapter_dir) = fixture(root.path());

        // A deeper base with the same vocabulary
        let tok    = test_tokenizer(&root.path().join("tok2"));
        let config = tiny_config(tok.get_vocab_size(true)).with_num_layers(3);
        let other: CausalLm<CpuBackend> = config.init(&Default::default());
        let other_dir = root.path().join("other");
        ModelStore::new(&other_dir).save(&other, &config, &tok).unwrap();

        let err = MergeUseCase::new(&other_dir, &adapter_dir, root.path().join("merged"))
            .execute()
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ButlerError>(), Some(ButlerError::AdapterMismatch(_))));
        assert!(!root.path().join("merged").exists());
    }

    #[test]
    fn test_output_may_not_overwrite_base() {
        let root = tempfile::tempdir().unwrap();
        let (base_dir, adapter_dir) = fixture(root.path());
        let err = MergeUseCase::new(&base_dir, &adapter_dir, &base_dir).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<ButlerError>(), Some(ButlerError::InvalidConfig(_))));
    }
}
