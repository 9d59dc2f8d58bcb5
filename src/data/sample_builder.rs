// ============================================================
// Layer 4 — Sample Builder
// ============================================================
// Turns one (question, answer) Sample into a loss-masked
// EncodedExample.
//
//   1. Render the question as a single user turn through the chat
//      template, ending with the open assistant turn. No system
//      prompt here: training uses the bare user turn while serving
//      prepends the system prompt.
//   2. Encode prompt and answer separately, each truncated to
//      `max_len` tokens by dropping the tail.
//   3. input_ids      = prompt ++ answer ++ [pad]
//      attention_mask = prompt_mask ++ answer_mask ++ [1]
//      labels         = [IGNORE]*len(prompt) ++ answer ++ [pad]
//
// Only the answer span (including any trailing command tag) and
// the terminator are supervised, so the model learns to emit tags
// without learning to regurgitate questions.

use anyhow::Result;
use tokenizers::Tokenizer;

use crate::data::template::ChatTemplate;
use crate::domain::chat::ChatMessage;
use crate::domain::command_tag::CommandTag;
use crate::domain::sample::{EncodedExample, Sample, IGNORE_INDEX};
use crate::infra::tokenizer_store::SpecialTokenIds;

/// Per-side token limit for prompts and answers.
pub const MAX_SEQ_TOKENS: usize = 512;

pub struct SampleBuilder {
    tokenizer: Tokenizer,
    template:  ChatTemplate,
    max_len:   usize,
    pad_id:    u32,
}

struct Truncated {
    ids:       Vec<u32>,
    mask:      Vec<u32>,
    truncated: bool,
}

impl SampleBuilder {
    pub fn new(tokenizer: Tokenizer, max_len: usize) -> Result<Self> {
        let pad_id = SpecialTokenIds::resolve(&tokenizer)?.pad;
        Ok(Self { tokenizer, template: ChatTemplate::new(), max_len, pad_id })
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn build(&self, sample: &Sample) -> Result<EncodedExample> {
        let prompt = self
            .template
            .render(&[ChatMessage::user(sample.question.as_str())], true);

        let prompt = self.encode_truncated(&prompt)?;
        let answer = self.encode_truncated(&sample.answer)?;

        if prompt.truncated {
            tracing::debug!("Prompt truncated to {} tokens", self.max_len);
        }
        if answer.truncated {
            if CommandTag::extract(&sample.answer).is_some() {
                tracing::warn!(
                    "Answer truncated to {} tokens; its trailing command tag is lost for question '{}'",
                    self.max_len,
                    sample.question
                );
            } else {
                tracing::debug!("Answer truncated to {} tokens", self.max_len);
            }
        }

        let total = prompt.ids.len() + answer.ids.len() + 1;

        let mut input_ids = Vec::with_capacity(total);
        input_ids.extend_from_slice(&prompt.ids);
        input_ids.extend_from_slice(&answer.ids);
        input_ids.push(self.pad_id);

        let mut attention_mask = Vec::with_capacity(total);
        attention_mask.extend_from_slice(&prompt.mask);
        attention_mask.extend_from_slice(&answer.mask);
        attention_mask.push(1);

        let mut labels = vec![IGNORE_INDEX; prompt.ids.len()];
        labels.reserve(answer.ids.len() + 1);
        labels.extend(answer.ids.iter().map(|&id| id as i64));
        labels.push(self.pad_id as i64);

        Ok(EncodedExample { input_ids, attention_mask, labels })
    }

    pub fn build_batch(&self, samples: &[&Sample]) -> Result<Vec<EncodedExample>> {
        samples.iter().map(|s| self.build(s)).collect()
    }

    fn encode_truncated(&self, text: &str) -> Result<Truncated> {
        let enc = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
        let ids  = enc.get_ids();
        let keep = ids.len().min(self.max_len);
        Ok(Truncated {
            ids:       ids[..keep].to_vec(),
            mask:      enc.get_attention_mask()[..keep].to_vec(),
            truncated: ids.len() > self.max_len,
        })
    }
}
