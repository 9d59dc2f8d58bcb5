// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Greedy autoregressive generation over a merged (or base) model.
//
//   messages → chat template (+ open assistant turn)
//            → encode, keep the first MAX_PROMPT_TOKENS tokens
//              (trailing tokens dropped, as for training samples)
//            → repeat: forward, argmax at the last position, append
//              until a stop id or MAX_NEW_TOKENS new tokens
//            → decode only the new ids, skipping special tokens,
//              and drop the spaces the word-level decoder adds
//            → drop a marker the token budget cut in half
//
// Command markers are ordinary (non-special) tokens, so they
// survive decoding and reach the caller verbatim.
//
// No KV cache: every step re-runs the full sequence.

use anyhow::Result;
use burn::prelude::*;
use tokenizers::Tokenizer;

use crate::data::template::ChatTemplate;
use crate::domain::{
    chat::ChatMessage,
    command_tag::strip_partial_marker,
    errors::ButlerError,
    traits::ReplyGenerator,
};
use crate::infra::model_store::ModelStore;
use crate::infra::tokenizer_store::{tidy_decoded, SpecialTokenIds};
use crate::ml::model::CausalLm;

pub const MAX_PROMPT_TOKENS: usize = 512;
pub const MAX_NEW_TOKENS:    usize = 256;

pub struct Inferencer<B: Backend> {
    model:     CausalLm<B>,
    tokenizer: Tokenizer,
    template:  ChatTemplate,
    special:   SpecialTokenIds,
    device:    B::Device,
    max_prompt_tokens: usize,
    max_new_tokens:    usize,
}

impl<B: Backend> Inferencer<B> {
    pub fn new(model: CausalLm<B>, tokenizer: Tokenizer, device: B::Device) -> Result<Self> {
        let special = SpecialTokenIds::resolve(&tokenizer)?;
        Ok(Self {
            model,
            tokenizer,
            template: ChatTemplate::new(),
            special,
            device,
            max_prompt_tokens: MAX_PROMPT_TOKENS,
            max_new_tokens:    MAX_NEW_TOKENS,
        })
    }

    /// Load a merged/base model directory for serving.
    pub fn from_dir(store: &ModelStore, device: B::Device) -> Result<Self> {
        let loaded = store.load::<B>(&device)?;
        Self::new(loaded.model, loaded.tokenizer, device)
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    /// Token ids of the rendered prompt, cut to the prompt budget by
    /// dropping trailing tokens.
    pub fn encode_prompt(&self, messages: &[ChatMessage]) -> Result<Vec<u32>> {
        let text = self.template.render(messages, true);
        let enc  = self
            .tokenizer
            .encode(text.as_str(), false)
            .map_err(|e| ButlerError::generation(format!("tokenisation: {e}")))?;
        let ids = enc.get_ids();
        let budget = self.prompt_budget();
        if ids.len() > budget {
            tracing::warn!("Prompt of {} tokens truncated to {}", ids.len(), budget);
        }
        Ok(ids[..ids.len().min(budget)].to_vec())
    }

    /// Greedily extend `prompt`, returning only the new ids (stop id excluded).
    pub fn generate(&self, prompt: &[u32]) -> Result<Vec<u32>> {
        if prompt.is_empty() {
            return Err(ButlerError::generation("empty prompt").into());
        }
        let limit = self.max_new_tokens.min(
            self.model.max_position_embeddings.saturating_sub(prompt.len()),
        );

        let mut ids: Vec<i32> = prompt.iter().map(|&t| t as i32).collect();
        let mut generated = Vec::new();

        for _ in 0..limit {
            let seq    = ids.len();
            let input  = Tensor::<B, 1, Int>::from_ints(ids.as_slice(), &self.device).reshape([1, seq]);
            let mask   = Tensor::<B, 2, Int>::ones([1, seq], &self.device);
            let logits = self.model.forward(input, mask);
            let vocab  = logits.dims()[2];

            let next: i64 = logits
                .slice([0..1, seq - 1..seq, 0..vocab])
                .reshape([vocab])
                .argmax(0)
                .into_scalar()
                .elem::<i64>();
            let next = u32::try_from(next)
                .map_err(|_| ButlerError::generation(format!("invalid token id {next}")))?;

            if self.special.stop.contains(&next) {
                break;
            }
            generated.push(next);
            ids.push(next as i32);
        }
        Ok(generated)
    }

    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        let text = self
            .tokenizer
            .decode(ids, true)
            .map_err(|e| ButlerError::generation(format!("decoding: {e}")))?;
        Ok(strip_partial_marker(tidy_decoded(&text).trim()).to_string())
    }

    fn prompt_budget(&self) -> usize {
        let room = self
            .model
            .max_position_embeddings
            .saturating_sub(self.max_new_tokens)
            .max(1);
        self.max_prompt_tokens.min(room)
    }
}

impl<B: Backend> ReplyGenerator for Inferencer<B> {
    fn generate_reply(&mut self, messages: &[ChatMessage]) -> Result<String> {
        let prompt = self.encode_prompt(messages)?;
        let new    = self.generate(&prompt)?;
        let reply  = self.decode(&new)?;
        tracing::debug!("Generated {} tokens from a {}-token prompt", new.len(), prompt.len());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command_tag::system_prompt;
    use crate::infra::tokenizer_store::tests::test_tokenizer;
    use crate::ml::model::tests::{tiny_config, TestBackend};

    fn inferencer(dir: &std::path::Path) -> Inferencer<TestBackend> {
        let tok    = test_tokenizer(dir);
        let device = Default::default();
        let model  = tiny_config(tok.get_vocab_size(true)).init(&device);
        Inferencer::new(model, tok, device).unwrap().with_max_new_tokens(8)
    }

    #[test]
    fn test_generation_respects_budget() {
        let dir = tempfile::tempdir().unwrap();
        let inf = inferencer(dir.path());
        let prompt = inf.encode_prompt(&[ChatMessage::user("打开风扇")]).unwrap();
        let new = inf.generate(&prompt).unwrap();
        assert!(new.len() <= 8);
        assert!(new.iter().all(|id| !inf.special.stop.contains(id)));
    }

    #[test]
    fn test_long_conversation_keeps_prompt_head() {
        let dir = tempfile::tempdir().unwrap();
        let inf = inferencer(dir.path());
        let history = vec![
            ChatMessage::system(system_prompt()),
            ChatMessage::user("风".repeat(200)),
            ChatMessage::user("打开风扇"),
        ];
        let prompt = inf.encode_prompt(&history).unwrap();
        // tiny model: 64 positions, 8 reserved for the reply
        assert_eq!(prompt.len(), 56);

        let full = inf.tokenizer.encode(inf.template.render(&history, true).as_str(), false).unwrap();
        assert!(full.len() > prompt.len());
        assert!(full.get_ids().starts_with(&prompt));
    }

    #[test]
    fn test_decode_keeps_markers_and_skips_template_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let inf = inferencer(dir.path());
        let ids = inf.tokenizer.encode("好的<|fan_on|><|im_end|>", false).unwrap().get_ids().to_vec();
        let text = inf.decode(&ids).unwrap();
        assert_eq!(text, "好的<|fan_on|>");
    }

    #[test]
    fn test_reply_generator_returns_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut inf = inferencer(dir.path());
        let reply = inf.generate_reply(&[ChatMessage::user("你好")]);
        assert!(reply.is_ok());
    }
}
