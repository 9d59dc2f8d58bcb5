// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Fine-tunes LoRA deltas on top of a frozen base model.
//
//   for epoch in 1..=epochs:
//       shuffle samples, cut into batches of batch_size
//       for batch:
//           encode (prompt masked) → pad → forward → masked loss
//           backward → AdamW step on the deltas only
//       log mean loss, append metrics.csv row
//       save the adapter (overwrites the previous epoch's files)
//
// Key Burn insight:
//   - The base weights went through Module::no_grad(), so
//     GradientsParams only holds entries for lora_a / lora_b and
//     the optimiser leaves everything else untouched
//   - The model stays on the AutodiffBackend the whole time;
//     saving goes through AdapterModule::extract(&model.valid())
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use anyhow::Result;
use burn::{
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, SeedableRng};

use crate::application::train_use_case::TrainConfig;
use crate::data::{batcher::ChatBatcher, dataset::SampleDataset, sample_builder::SampleBuilder};
use crate::infra::{
    adapter_store::{AdapterConfig, AdapterStore},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::lora::{self, AdapterModule};
use crate::ml::model::{CausalLm, CausalLmConfig};

/// What a finished run hands back to the caller.
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub model:   CausalLm<B>,
    pub metrics: Vec<EpochMetrics>,
}

pub fn train_adapter<B: AutodiffBackend>(
    cfg:      &TrainConfig,
    base_cfg: &CausalLmConfig,
    base:     CausalLm<B>,
    dataset:  &SampleDataset,
    builder:  &SampleBuilder,
    store:    &AdapterStore,
    device:   &B::Device,
) -> Result<TrainingOutcome<B>> {

    // ── Wrap the frozen base with fresh deltas ────────────────────────────────
    // cfg.seed fixes the A factors, the dropout masks and the shuffle order
    B::seed(cfg.seed);
    let mut model = lora::wrap(base, &cfg.lora, cfg.seed, device)?;

    // ── AdamW optimiser ───────────────────────────────────────────────────────
    // Same moment estimates as Adam, with decoupled weight decay:
    // θ = θ - lr * (m / (√v + ε) + λ·θ)
    let mut optim = AdamWConfig::new()
        .with_epsilon(1e-8)
        .with_weight_decay(0.0)
        .init();

    let batcher = ChatBatcher::<B>::new(device.clone(), builder.pad_id());
    let metrics = MetricsLogger::new(&cfg.log_dir)?;
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut history = Vec::with_capacity(cfg.epochs);
    let mut best_loss = f64::INFINITY;

    let batches_per_epoch = dataset.batches_per_epoch(cfg.batch_size);
    tracing::info!(
        "Training on {} samples: {} epochs × {} batches (batch_size={}, lr={})",
        dataset.len(), cfg.epochs, batches_per_epoch, cfg.batch_size, cfg.learning_rate
    );

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.epochs {
        let pb = ProgressBar::new(batches_per_epoch as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} epoch {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        pb.set_prefix(format!("{epoch}/{}", cfg.epochs));

        let mut loss_sum   = 0.0f64;
        let mut batches    = 0usize;
        let mut supervised = 0usize;

        for samples in dataset.epoch_batches(cfg.batch_size, &mut rng) {
            let examples = builder.build_batch(&samples)?;
            supervised  += examples.iter().map(|e| e.supervised_len()).sum::<usize>();
            let batch    = batcher.batch(&examples);

            let loss = model.forward_loss(batch.input_ids, batch.attention_mask, batch.labels);
            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
            if !loss_val.is_finite() {
                tracing::warn!("Non-finite loss at epoch {} batch {}", epoch, batches + 1);
            }
            loss_sum += loss_val;
            batches  += 1;

            // Backward pass + AdamW update on the deltas
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(cfg.learning_rate, model, grads);

            pb.set_message(format!("loss={loss_val:.4}"));
            pb.inc(1);
        }

        let train_loss = if batches > 0 { loss_sum / batches as f64 } else { f64::NAN };
        pb.finish_with_message(format!("loss={train_loss:.4}"));

        let row = EpochMetrics::new(epoch, train_loss, batches, supervised);
        metrics.log(&row)?;
        tracing::info!("Epoch {}/{} | train_loss={:.4}", epoch, cfg.epochs, train_loss);
        if row.is_improvement(best_loss) {
            best_loss = row.train_loss;
        } else {
            tracing::info!("train_loss did not improve on {:.4}", best_loss);
        }
        history.push(row);

        // ── Checkpoint: the adapter dir always holds the latest epoch ─────────
        let meta = AdapterConfig::describe(cfg, base_cfg, epoch);
        store.save(AdapterModule::extract(&model.valid()), &meta, cfg, builder.tokenizer())?;
        tracing::info!("Adapter saved for epoch {}", epoch);
    }

    tracing::info!("Training complete!");
    Ok(TrainingOutcome { model, metrics: history })
}
