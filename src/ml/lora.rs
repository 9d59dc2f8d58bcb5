// ============================================================
// Layer 5 — LoRA Adapters
// ============================================================
// Low-rank adaptation of the frozen base projections.
//
// For a base projection y = x·W + b with W: [d_in, d_out]:
//
//   y = x·W + b + dropout(x)·A·B · (alpha / rank)
//
//   A: [d_in, rank]   uniform(-1/√d_in, 1/√d_in), drawn from a
//                     StdRng seeded by the caller
//   B: [rank, d_out]  zeros, so a fresh adapter is a no-op
//
// Only A and B receive gradients. The base weights are frozen
// with Module::no_grad() before the deltas are attached.
//
// The adapter is persisted on its own as an AdapterModule: one
// BlockAdapters per decoder layer, one Option<LoraDelta> per
// projection name. Merging folds A·B·scaling into W and drops
// the delta, giving a model with exactly the base topology.
//
// Reference: Hu et al. (2021) LoRA: Low-Rank Adaptation of
//            Large Language Models

use anyhow::Result;
use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Linear},
    prelude::*,
    tensor::TensorData,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::errors::ButlerError;
use crate::ml::model::{CausalLm, DecoderBlock, PROJECTION_NAMES};

// ─── LoraConfig ───────────────────────────────────────────────────────────────
/// Adapter hyperparameters, saved as adapter_config.json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraConfig {
    pub rank:           usize,
    pub alpha:          f64,
    pub dropout:        f64,
    pub target_modules: Vec<String>,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            rank:           8,
            alpha:          32.0,
            dropout:        0.1,
            target_modules: PROJECTION_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl LoraConfig {
    pub fn scaling(&self) -> f64 {
        self.alpha / self.rank as f64
    }

    pub fn validate(&self) -> Result<(), ButlerError> {
        if self.rank == 0 {
            return Err(ButlerError::invalid_config("LoRA rank must be at least 1"));
        }
        if self.alpha <= 0.0 {
            return Err(ButlerError::invalid_config("LoRA alpha must be positive"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ButlerError::invalid_config("LoRA dropout must be in [0, 1)"));
        }
        if self.target_modules.is_empty() {
            return Err(ButlerError::invalid_config("LoRA needs at least one target module"));
        }
        Ok(())
    }
}

// ─── LoraDelta ────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct LoraDelta<B: Backend> {
    pub lora_a:  Param<Tensor<B, 2>>,
    pub lora_b:  Param<Tensor<B, 2>>,
    pub dropout: Dropout,
    pub scaling: f64,
}

impl<B: Backend> LoraDelta<B> {
    pub fn init(d_in: usize, d_out: usize, cfg: &LoraConfig, rng: &mut StdRng, device: &B::Device) -> Self {
        let bound = 1.0 / (d_in as f32).sqrt();
        let values: Vec<f32> = (0..d_in * cfg.rank).map(|_| rng.gen_range(-bound..bound)).collect();
        let lora_a = Tensor::from_data(TensorData::new(values, [d_in, cfg.rank]), device);
        let lora_b = Tensor::zeros([cfg.rank, d_out], device);
        Self {
            lora_a:  Param::from_tensor(lora_a),
            lora_b:  Param::from_tensor(lora_b),
            dropout: DropoutConfig::new(cfg.dropout).init(),
            scaling: cfg.scaling(),
        }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        self.dropout
            .forward(x)
            .matmul(self.lora_a.val().unsqueeze())
            .matmul(self.lora_b.val().unsqueeze())
            .mul_scalar(self.scaling)
    }

    /// [d_in, d_out] implied by the two factors.
    pub fn dims(&self) -> [usize; 2] {
        [self.lora_a.val().dims()[0], self.lora_b.val().dims()[1]]
    }

    pub fn rank(&self) -> usize {
        self.lora_a.val().dims()[1]
    }

    /// A·B·scaling, shaped like the base weight.
    pub fn weight_update(&self) -> Tensor<B, 2> {
        self.lora_a
            .val()
            .matmul(self.lora_b.val())
            .mul_scalar(self.scaling)
    }
}

// ─── LoraLinear ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct LoraLinear<B: Backend> {
    pub base: Linear<B>,
    pub lora: Option<LoraDelta<B>>,
}

impl<B: Backend> LoraLinear<B> {
    pub fn new(base: Linear<B>) -> Self {
        Self { base, lora: None }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match &self.lora {
            Some(delta) => self.base.forward(x.clone()) + delta.forward(x),
            None        => self.base.forward(x),
        }
    }

    /// [d_in, d_out] of the base weight.
    pub fn dims(&self) -> [usize; 2] {
        self.base.weight.val().dims()
    }

    /// Fold the delta into the base weight and drop it.
    ///
    /// The weight keeps its ParamId, so a merged record lines up
    /// with the base record entry for entry.
    pub fn merge_in_place(&mut self) {
        if let Some(delta) = self.lora.take() {
            let merged = self.base.weight.val() + delta.weight_update();
            self.base.weight = Param::initialized(self.base.weight.id.clone(), merged);
        }
    }
}

// ─── AdapterModule ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct BlockAdapters<B: Backend> {
    pub q_proj:    Option<LoraDelta<B>>,
    pub k_proj:    Option<LoraDelta<B>>,
    pub v_proj:    Option<LoraDelta<B>>,
    pub o_proj:    Option<LoraDelta<B>>,
    pub gate_proj: Option<LoraDelta<B>>,
    pub up_proj:   Option<LoraDelta<B>>,
    pub down_proj: Option<LoraDelta<B>>,
}

impl<B: Backend> BlockAdapters<B> {
    fn from_block(block: &DecoderBlock<B>) -> Self {
        let take = |name: &str| block.projection(name).and_then(|p| p.lora.clone());
        Self {
            q_proj:    take("q_proj"),
            k_proj:    take("k_proj"),
            v_proj:    take("v_proj"),
            o_proj:    take("o_proj"),
            gate_proj: take("gate_proj"),
            up_proj:   take("up_proj"),
            down_proj: take("down_proj"),
        }
    }

    fn slot(&self, name: &str) -> Option<&LoraDelta<B>> {
        match name {
            "q_proj"    => self.q_proj.as_ref(),
            "k_proj"    => self.k_proj.as_ref(),
            "v_proj"    => self.v_proj.as_ref(),
            "o_proj"    => self.o_proj.as_ref(),
            "gate_proj" => self.gate_proj.as_ref(),
            "up_proj"   => self.up_proj.as_ref(),
            "down_proj" => self.down_proj.as_ref(),
            _           => None,
        }
    }
}

/// The trainable part of a LoRA-wrapped model, persisted separately
/// from the frozen base as adapter_model.mpk.gz.
#[derive(Module, Debug)]
pub struct AdapterModule<B: Backend> {
    pub layers: Vec<BlockAdapters<B>>,
}

impl<B: Backend> AdapterModule<B> {
    /// Clone the deltas out of a wrapped model.
    pub fn extract(model: &CausalLm<B>) -> Self {
        Self { layers: model.layers.iter().map(BlockAdapters::from_block).collect() }
    }

    /// Number of projections carrying a delta.
    pub fn num_deltas(&self) -> usize {
        self.layers
            .iter()
            .map(|l| PROJECTION_NAMES.iter().filter(|n| l.slot(n).is_some()).count())
            .sum()
    }
}

// ─── Operations ───────────────────────────────────────────────────────────────

/// Freeze `model` and attach a fresh delta to every target projection.
///
/// The A factors depend only on `seed`, so equal seeds give equal adapters.
pub fn wrap<B: Backend>(
    model:  CausalLm<B>,
    cfg:    &LoraConfig,
    seed:   u64,
    device: &B::Device,
) -> Result<CausalLm<B>> {
    cfg.validate()?;
    check_targets(cfg)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut model = model.no_grad();
    for block in model.layers.iter_mut() {
        for name in &cfg.target_modules {
            let proj = block
                .projection_mut(name)
                .ok_or_else(|| ButlerError::adapter_mismatch(format!("no projection named '{name}'")))?;
            let [d_in, d_out] = proj.dims();
            proj.lora = Some(LoraDelta::init(d_in, d_out, cfg, &mut rng, device));
        }
    }

    let trainable: usize = model
        .layers
        .iter()
        .flat_map(|b| PROJECTION_NAMES.iter().filter_map(|n| b.projection(n)))
        .filter_map(|p| p.lora.as_ref())
        .map(|d| {
            let [d_in, d_out] = d.dims();
            (d_in + d_out) * d.rank()
        })
        .sum();
    tracing::info!(
        "LoRA attached: rank={}, alpha={}, targets={:?}, trainable params={}",
        cfg.rank, cfg.alpha, cfg.target_modules, trainable
    );
    Ok(model)
}

/// Attach previously trained deltas to a base model.
///
/// Fails with AdapterMismatch when the layer count differs or a
/// delta's factors do not fit the projection it targets.
pub fn attach<B: Backend>(model: CausalLm<B>, adapters: AdapterModule<B>) -> Result<CausalLm<B>> {
    if adapters.layers.len() != model.num_layers() {
        return Err(ButlerError::adapter_mismatch(format!(
            "adapter has {} layers, base model has {}",
            adapters.layers.len(),
            model.num_layers()
        ))
        .into());
    }

    let mut model = model;
    for (i, (block, layer)) in model.layers.iter_mut().zip(adapters.layers).enumerate() {
        for name in PROJECTION_NAMES {
            let Some(delta) = layer.slot(name) else { continue };
            let proj = block
                .projection_mut(name)
                .ok_or_else(|| ButlerError::adapter_mismatch(format!("no projection named '{name}'")))?;
            if delta.dims() != proj.dims() {
                return Err(ButlerError::adapter_mismatch(format!(
                    "layer {i} {name}: adapter is {:?}, base projection is {:?}",
                    delta.dims(),
                    proj.dims()
                ))
                .into());
            }
            proj.lora = Some(delta.clone());
        }
    }
    Ok(model)
}

/// Fold every delta into its base weight.
pub fn merge_adapters<B: Backend>(model: CausalLm<B>) -> CausalLm<B> {
    let mut model = model;
    for block in model.layers.iter_mut() {
        for name in PROJECTION_NAMES {
            if let Some(proj) = block.projection_mut(name) {
                proj.merge_in_place();
            }
        }
    }
    model
}

impl<B: Backend> CausalLm<B> {
    /// Fold every attached delta into its base weight. See [`merge_adapters`].
    pub fn merge_adapters(self) -> Self {
        merge_adapters(self)
    }
}

fn check_targets(cfg: &LoraConfig) -> Result<(), ButlerError> {
    match cfg.target_modules.iter().find(|t| !PROJECTION_NAMES.contains(&t.as_str())) {
        Some(unknown) => Err(ButlerError::adapter_mismatch(format!(
            "target module '{unknown}' does not exist in the base model"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::tests::{tiny_config, TestBackend};
    use burn::tensor::Distribution;

    fn input(device: &<TestBackend as Backend>::Device) -> (Tensor<TestBackend, 2, Int>, Tensor<TestBackend, 2, Int>) {
        let ids  = Tensor::<TestBackend, 1, Int>::from_ints([3, 7, 1, 9], device).reshape([1, 4]);
        let mask = Tensor::<TestBackend, 1, Int>::ones([4], device).reshape([1, 4]);
        (ids, mask)
    }

    /// Give every B factor non-zero values so the delta actually matters.
    fn perturb(model: CausalLm<TestBackend>, device: &<TestBackend as Backend>::Device) -> CausalLm<TestBackend> {
        let mut model = model;
        for block in model.layers.iter_mut() {
            for name in PROJECTION_NAMES {
                if let Some(delta) = block.projection_mut(name).and_then(|p| p.lora.as_mut()) {
                    let dims = delta.lora_b.val().dims();
                    delta.lora_b = Param::from_tensor(Tensor::random(dims, Distribution::Uniform(-0.5, 0.5), device));
                }
            }
        }
        model
    }

    fn no_dropout() -> LoraConfig {
        LoraConfig { dropout: 0.0, ..LoraConfig::default() }
    }

    #[test]
    fn test_default_config() {
        let cfg = LoraConfig::default();
        assert_eq!(cfg.rank, 8);
        assert_eq!(cfg.scaling(), 4.0);
        assert_eq!(cfg.target_modules.len(), 7);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(LoraConfig { rank: 0, ..LoraConfig::default() }.validate().is_err());
        assert!(LoraConfig { dropout: 1.0, ..LoraConfig::default() }.validate().is_err());
        assert!(LoraConfig { target_modules: vec![], ..LoraConfig::default() }.validate().is_err());
    }

    #[test]
    fn test_fresh_adapter_is_noop() {
        let device = Default::default();
        let base: CausalLm<TestBackend> = tiny_config(16).init(&device);
        let (ids, mask) = input(&device);
        let before = base.forward(ids.clone(), mask.clone()).into_data();

        let wrapped = wrap(base, &no_dropout(), 0, &device).unwrap();
        wrapped.forward(ids, mask).into_data().assert_approx_eq(&before, 5);
    }

    #[test]
    fn test_unknown_target_is_adapter_mismatch() {
        let device = Default::default();
        let base: CausalLm<TestBackend> = tiny_config(16).init(&device);
        let cfg = LoraConfig { target_modules: vec!["c_attn".into()], ..LoraConfig::default() };
        let err = wrap(base, &cfg, 0, &device).unwrap_err();
        assert!(matches!(err.downcast_ref::<ButlerError>(), Some(ButlerError::AdapterMismatch(_))));
    }

    #[test]
    fn test_extract_counts_only_targets() {
        let device = Default::default();
        let base: CausalLm<TestBackend> = tiny_config(16).init(&device);
        let cfg = LoraConfig { target_modules: vec!["q_proj".into(), "v_proj".into()], ..no_dropout() };
        let wrapped = wrap(base, &cfg, 0, &device).unwrap();
        let adapters = AdapterModule::extract(&wrapped);
        assert_eq!(adapters.layers.len(), 2);
        assert_eq!(adapters.num_deltas(), 4);
    }

    #[test]
    fn test_merge_matches_adapted_forward() {
        let device = Default::default();
        let base: CausalLm<TestBackend> = tiny_config(16).init(&device);
        let wrapped = perturb(wrap(base, &no_dropout(), 0, &device).unwrap(), &device);
        let (ids, mask) = input(&device);

        let adapted = wrapped.forward(ids.clone(), mask.clone()).into_data();
        let merged  = merge_adapters(wrapped);
        assert_eq!(AdapterModule::extract(&merged).num_deltas(), 0);
        merged.forward(ids, mask).into_data().assert_approx_eq(&adapted, 3);
    }

    #[test]
    fn test_attach_rejects_layer_count_mismatch() {
        let device = Default::default();
        let two: CausalLm<TestBackend> = tiny_config(16).init(&device);
        let adapters = AdapterModule::extract(&wrap(two, &no_dropout(), 0, &device).unwrap());

        let three: CausalLm<TestBackend> = tiny_config(16).with_num_layers(3).init(&device);
        let err = attach(three, adapters).unwrap_err();
        assert!(matches!(err.downcast_ref::<ButlerError>(), Some(ButlerError::AdapterMismatch(_))));
    }

    #[test]
    fn test_init_depends_only_on_seed() {
        let device = Default::default();
        let base: CausalLm<TestBackend> = tiny_config(16).init(&device);
        let lora_a = |seed: u64| -> Vec<f32> {
            let wrapped = wrap(base.clone(), &no_dropout(), seed, &device).unwrap();
            let delta = wrapped.layers[0].attn.q_proj.lora.as_ref().unwrap();
            delta.lora_a.val().into_data().to_vec().unwrap()
        };

        let first = lora_a(7);
        assert_eq!(first, lora_a(7));
        assert_ne!(first, lora_a(8));
        let bound = 1.0 / 16f32.sqrt();
        assert!(first.iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn test_attach_rejects_width_mismatch() {
        let device = Default::default();
        let narrow: CausalLm<TestBackend> = tiny_config(16).init(&device);
        let adapters = AdapterModule::extract(&wrap(narrow, &no_dropout(), 0, &device).unwrap());

        let wide: CausalLm<TestBackend> = tiny_config(16).with_d_model(32).init(&device);
        assert!(attach(wide, adapters).is_err());
    }
}
