// ============================================================
// Layer 4 — Chat Template
// ============================================================
// Renders a message list into the prompt string the model sees.
// The same template is used when building training samples and
// when serving, so the model is trained on exactly the layout it
// is later prompted with.
//
// ChatML layout (Qwen family):
//
//   <|im_start|>system
//   {system prompt}<|im_end|>
//   <|im_start|>user
//   {question}<|im_end|>
//   <|im_start|>assistant
//   ← generation starts here
//
// Reference: ChatML format, Qwen2.5 tokenizer_config.json

use crate::domain::chat::ChatMessage;

pub const IM_START:    &str = "<|im_start|>";
pub const IM_END:      &str = "<|im_end|>";
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// Tokens the template reserves; they are special tokens in the
/// tokenizer and are skipped when decoding replies.
pub const TEMPLATE_SPECIAL_TOKENS: [&str; 3] = [END_OF_TEXT, IM_START, IM_END];

#[derive(Debug, Clone, Copy, Default)]
pub struct ChatTemplate;

impl ChatTemplate {
    pub fn new() -> Self {
        Self
    }

    /// Render `messages` in order. With `add_generation_prompt` the
    /// string ends with an open assistant turn.
    pub fn render(&self, messages: &[ChatMessage], add_generation_prompt: bool) -> String {
        let mut prompt = String::new();
        for msg in messages {
            prompt.push_str(IM_START);
            prompt.push_str(msg.role.as_str());
            prompt.push('\n');
            prompt.push_str(&msg.content);
            prompt.push_str(IM_END);
            prompt.push('\n');
        }
        if add_generation_prompt {
            prompt.push_str(IM_START);
            prompt.push_str("assistant\n");
        }
        prompt
    }
}
