// ============================================================
// Layer 5 — Causal Language Model
// ============================================================
// Decoder-only transformer with the projection layout of the
// Qwen/Llama family, so the LoRA target names carry over:
//
//   token + position embeddings
//   N × DecoderBlock
//       x = x + o_proj(attn(q_proj, k_proj, v_proj)(norm(x)))
//       x = x + down_proj(silu(gate_proj(norm(x))) * up_proj(norm(x)))
//   final norm → lm_head → logits over the vocabulary
//
// Every projection is a LoraLinear: a plain Linear plus an
// optional low-rank delta (see lora.rs). A base or merged model
// has no deltas, so its record has exactly the base topology.
//
// Reference: Vaswani et al. (2017) Attention Is All You Need
//            Burn Book §3 (Building Blocks)

use burn::{
    nn::{
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation,
};

use crate::domain::sample::IGNORE_INDEX;
use crate::ml::lora::LoraLinear;

/// Additive attention bias for masked positions.
const MASKED: f32 = -1.0e4;

/// Names of the projections a LoRA adapter may target.
pub const PROJECTION_NAMES: [&str; 7] = [
    "q_proj", "k_proj", "v_proj", "o_proj", "gate_proj", "up_proj", "down_proj",
];

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct CausalLmConfig {
    pub vocab_size: usize,
    #[config(default = 2048)]
    pub max_position_embeddings: usize,
    #[config(default = 256)]
    pub d_model: usize,
    #[config(default = 4)]
    pub num_heads: usize,
    #[config(default = 4)]
    pub num_layers: usize,
    #[config(default = 1024)]
    pub d_ff: usize,
    #[config(default = 0.0)]
    pub dropout: f64,
}

impl CausalLmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CausalLm<B> {
        let token_embedding    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.max_position_embeddings, self.d_model).init(device);
        let layers: Vec<DecoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_block(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.d_model).init(device);
        let lm_head    = LinearConfig::new(self.d_model, self.vocab_size)
            .with_bias(false)
            .init(device);
        let dropout    = DropoutConfig::new(self.dropout).init();
        CausalLm {
            token_embedding, position_embedding, layers,
            final_norm, lm_head, dropout,
            max_position_embeddings: self.max_position_embeddings,
        }
    }

    fn build_block<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        let proj = |d_in: usize, d_out: usize| {
            LoraLinear::new(LinearConfig::new(d_in, d_out).init(device))
        };
        let attn = SelfAttention {
            q_proj:    proj(self.d_model, self.d_model),
            k_proj:    proj(self.d_model, self.d_model),
            v_proj:    proj(self.d_model, self.d_model),
            o_proj:    proj(self.d_model, self.d_model),
            dropout:   DropoutConfig::new(self.dropout).init(),
            num_heads: self.num_heads,
            head_dim:  self.d_model / self.num_heads,
        };
        let mlp = GatedMlp {
            gate_proj: proj(self.d_model, self.d_ff),
            up_proj:   proj(self.d_model, self.d_ff),
            down_proj: proj(self.d_ff, self.d_model),
        };
        DecoderBlock {
            attn,
            mlp,
            input_norm:     LayerNormConfig::new(self.d_model).init(device),
            post_attn_norm: LayerNormConfig::new(self.d_model).init(device),
        }
    }
}

// ─── Attention ────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct SelfAttention<B: Backend> {
    pub q_proj:    LoraLinear<B>,
    pub k_proj:    LoraLinear<B>,
    pub v_proj:    LoraLinear<B>,
    pub o_proj:    LoraLinear<B>,
    pub dropout:   Dropout,
    pub num_heads: usize,
    pub head_dim:  usize,
}

impl<B: Backend> SelfAttention<B> {
    /// x: [batch, seq, d_model], bias: broadcastable to [batch, heads, seq, seq]
    pub fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, seq, d_model] = x.dims();
        let split_heads = |t: Tensor<B, 3>| {
            t.reshape([batch, seq, self.num_heads, self.head_dim]).swap_dims(1, 2)
        };

        let q = split_heads(self.q_proj.forward(x.clone()));
        let k = split_heads(self.k_proj.forward(x.clone()));
        let v = split_heads(self.v_proj.forward(x));

        let scores = q
            .matmul(k.swap_dims(2, 3))
            .div_scalar((self.head_dim as f64).sqrt())
            + bias;
        let weights = self.dropout.forward(activation::softmax(scores, 3));

        let context = weights
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, seq, d_model]);
        self.o_proj.forward(context)
    }
}

// ─── Feed-forward ─────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct GatedMlp<B: Backend> {
    pub gate_proj: LoraLinear<B>,
    pub up_proj:   LoraLinear<B>,
    pub down_proj: LoraLinear<B>,
}

impl<B: Backend> GatedMlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let gate = activation::silu(self.gate_proj.forward(x.clone()));
        self.down_proj.forward(gate * self.up_proj.forward(x))
    }
}

// ─── Decoder block ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pub attn:           SelfAttention<B>,
    pub mlp:            GatedMlp<B>,
    pub input_norm:     LayerNorm<B>,
    pub post_attn_norm: LayerNorm<B>,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> Tensor<B, 3> {
        let h = x.clone() + self.attn.forward(self.input_norm.forward(x), bias);
        h.clone() + self.mlp.forward(self.post_attn_norm.forward(h))
    }

    /// Look up a projection by its LoRA target name.
    pub fn projection(&self, name: &str) -> Option<&LoraLinear<B>> {
        match name {
            "q_proj"    => Some(&self.attn.q_proj),
            "k_proj"    => Some(&self.attn.k_proj),
            "v_proj"    => Some(&self.attn.v_proj),
            "o_proj"    => Some(&self.attn.o_proj),
            "gate_proj" => Some(&self.mlp.gate_proj),
            "up_proj"   => Some(&self.mlp.up_proj),
            "down_proj" => Some(&self.mlp.down_proj),
            _           => None,
        }
    }

    pub fn projection_mut(&mut self, name: &str) -> Option<&mut LoraLinear<B>> {
        match name {
            "q_proj"    => Some(&mut self.attn.q_proj),
            "k_proj"    => Some(&mut self.attn.k_proj),
            "v_proj"    => Some(&mut self.attn.v_proj),
            "o_proj"    => Some(&mut self.attn.o_proj),
            "gate_proj" => Some(&mut self.mlp.gate_proj),
            "up_proj"   => Some(&mut self.mlp.up_proj),
            "down_proj" => Some(&mut self.mlp.down_proj),
            _           => None,
        }
    }
}

// ─── CausalLm ─────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct CausalLm<B: Backend> {
    pub token_embedding:         Embedding<B>,
    pub position_embedding:      Embedding<B>,
    pub layers:                  Vec<DecoderBlock<B>>,
    pub final_norm:              LayerNorm<B>,
    pub lm_head:                 Linear<B>,
    pub dropout:                 Dropout,
    pub max_position_embeddings: usize,
}

impl<B: Backend> CausalLm<B> {
    /// input_ids, attention_mask: [batch, seq] → logits: [batch, seq, vocab]
    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 3> {
        let [batch, seq] = input_ids.dims();
        let device = input_ids.device();

        let tok_emb   = self.token_embedding.forward(input_ids);
        let positions = Tensor::<B, 1, Int>::arange(0..seq as i64, &device)
            .unsqueeze::<2>()
            .expand([batch, seq]);
        let pos_emb = self.position_embedding.forward(positions);

        let bias = attention_bias::<B>(attention_mask, &device);

        let mut x = self.dropout.forward(tok_emb + pos_emb);
        for layer in &self.layers {
            x = layer.forward(x, bias.clone());
        }
        self.lm_head.forward(self.final_norm.forward(x))
    }

    /// Masked next-token cross-entropy for a padded batch.
    pub fn forward_loss(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
        labels:         Tensor<B, 2, Int>,
    ) -> Tensor<B, 1> {
        let logits = self.forward(input_ids, attention_mask);
        causal_lm_loss(logits, labels)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Hidden size, read from the embedding table.
    pub fn d_model(&self) -> usize {
        self.token_embedding.weight.val().dims()[1]
    }
}

/// Causal + padding mask as an additive bias of shape [batch, 1, seq, seq].
///
/// Query i may attend to key j only when j <= i and j is not padding.
fn attention_bias<B: Backend>(attention_mask: Tensor<B, 2, Int>, device: &B::Device) -> Tensor<B, 4> {
    let [batch, seq] = attention_mask.dims();

    let causal: Vec<f32> = (0..seq)
        .flat_map(|i| (0..seq).map(move |j| if j > i { MASKED } else { 0.0 }))
        .collect();
    let causal = Tensor::<B, 1>::from_floats(causal.as_slice(), device).reshape([1, 1, seq, seq]);

    let padding = attention_mask
        .equal_elem(0)
        .float()
        .mul_scalar(MASKED)
        .reshape([batch, 1, 1, seq]);

    causal + padding
}

/// Shifted cross-entropy: logits at position t predict labels at t+1.
/// Positions labelled IGNORE_INDEX contribute nothing; the result is
/// the mean over the remaining positions.
pub fn causal_lm_loss<B: Backend>(logits: Tensor<B, 3>, labels: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let [batch, seq, vocab] = logits.dims();
    if seq < 2 {
        // Nothing to predict; keep the graph connected.
        return logits.sum().mul_scalar(0.0);
    }
    let n = batch * (seq - 1);

    let logits  = logits.slice([0..batch, 0..seq - 1, 0..vocab]).reshape([n, vocab]);
    let targets = labels.slice([0..batch, 1..seq]).reshape([n]);

    let ignored = targets.clone().equal_elem(IGNORE_INDEX);
    let keep    = ignored.clone().bool_not().float();
    let safe    = targets.mask_fill(ignored, 0).reshape([n, 1]);

    let picked = activation::log_softmax(logits, 1)
        .gather(1, safe)
        .reshape([n]);

    let count = keep.clone().sum().clamp_min(1.0);
    (picked * keep).sum().neg() / count
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn::backend::NdArray;

    pub(crate) type TestBackend = NdArray;

    pub(crate) fn tiny_config(vocab_size: usize) -> CausalLmConfig {
        CausalLmConfig::new(vocab_size)
            .with_max_position_embeddings(64)
            .with_d_model(16)
            .with_num_heads(2)
            .with_num_layers(2)
            .with_d_ff(32)
    }

    fn ids(values: &[i32], device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 2, Int> {
        Tensor::<TestBackend, 1, Int>::from_ints(values, device).reshape([1, values.len()])
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model: CausalLm<TestBackend> = tiny_config(20).init(&device);
        let input = Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 3, 4, 5, 6], &device).reshape([2, 3]);
        let mask  = Tensor::<TestBackend, 1, Int>::from_ints([1, 1, 1, 1, 1, 0], &device).reshape([2, 3]);
        assert_eq!(model.forward(input, mask).dims(), [2, 3, 20]);
        assert_eq!(model.num_layers(), 2);
        assert_eq!(model.d_model(), 16);
    }

    #[test]
    fn test_future_tokens_do_not_change_past_logits() {
        let device = Default::default();
        let model: CausalLm<TestBackend> = tiny_config(20).init(&device);

        let a = model.forward(ids(&[3, 4, 5], &device), ids(&[1, 1, 1], &device));
        let b = model.forward(ids(&[3, 4, 9], &device), ids(&[1, 1, 1], &device));

        let first_two = |t: Tensor<TestBackend, 3>| t.slice([0..1, 0..2, 0..20]).into_data();
        first_two(a).assert_approx_eq(&first_two(b), 5);
    }

    #[test]
    fn test_loss_ignores_masked_labels() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 1>::from_floats([0.0; 12], &device).reshape([1, 3, 4]);

        // Uniform logits over 4 classes → -ln(1/4) for every supervised position
        let labels = ids(&[-100, -100, 2], &device);
        let loss: f64 = causal_lm_loss(logits.clone(), labels).into_scalar().elem();
        assert!((loss - 4.0f64.ln()).abs() < 1e-5);

        let all_ignored = ids(&[-100, -100, -100], &device);
        let loss: f64 = causal_lm_loss(logits, all_ignored).into_scalar().elem();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_loss_prefers_correct_prediction() {
        let device = Default::default();
        // Position 0 strongly predicts class 1
        let logits = Tensor::<TestBackend, 1>::from_floats(
            [0.0, 10.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            &device,
        ).reshape([1, 2, 4]);
        let right: f64 = causal_lm_loss(logits.clone(), ids(&[-100, 1], &device)).into_scalar().elem();
        let wrong: f64 = causal_lm_loss(logits, ids(&[-100, 2], &device)).into_scalar().elem();
        assert!(right < wrong);
    }
}
