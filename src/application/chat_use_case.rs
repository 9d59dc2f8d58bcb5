// ============================================================
// Layer 2 — ChatService
// ============================================================
// One chat turn:
//
//   [system prompt] ++ history ++ [user message]
//       → ReplyGenerator (Inferencer over the merged model)
//       → ChatReply { text, action }
//
// The service keeps no conversation state: the caller owns the
// history and passes it back in on every turn.
//
// The generator sits behind a parking_lot::Mutex so only one
// generation runs per model instance; a failed generation returns
// an error and leaves the generator usable (parking_lot mutexes do
// not poison).

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;

use crate::domain::{
    chat::ChatMessage,
    command_tag::{split_reply, system_prompt, CommandTag},
    errors::ButlerError,
    traits::ReplyGenerator,
};
use crate::infra::model_store::ModelStore;
use crate::ml::{inferencer::Inferencer, ComputeDevice, CpuBackend, GpuBackend};

/// A generated reply and the device command it ends with, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    /// Full reply text, marker included.
    pub reply:  String,
    pub action: Option<CommandTag>,
}

impl ChatReply {
    pub fn from_text(reply: String) -> Self {
        let action = split_reply(&reply).1;
        Self { reply, action }
    }

    /// Reply text without the trailing marker.
    pub fn spoken_text(&self) -> &str {
        split_reply(&self.reply).0
    }
}

pub struct ChatService {
    generator:     Mutex<Box<dyn ReplyGenerator>>,
    system_prompt: String,
}

impl ChatService {
    pub fn new(generator: Box<dyn ReplyGenerator>) -> Self {
        Self {
            generator:     Mutex::new(generator),
            system_prompt: system_prompt(),
        }
    }

    /// Load a merged model directory onto the chosen device.
    pub fn load(model_dir: &Path, device: ComputeDevice, max_new_tokens: usize) -> Result<Self> {
        let store = ModelStore::new(model_dir);
        let generator: Box<dyn ReplyGenerator> = match device {
            ComputeDevice::Cpu => Box::new(
                Inferencer::<CpuBackend>::from_dir(&store, Default::default())
                    .with_context(|| format!("Cannot load chat model from '{}'", model_dir.display()))?
                    .with_max_new_tokens(max_new_tokens),
            ),
            ComputeDevice::Wgpu => {
                let wgpu = burn::backend::wgpu::WgpuDevice::default();
                tracing::info!("Using WGPU device: {:?}", wgpu);
                Box::new(
                    Inferencer::<GpuBackend>::from_dir(&store, wgpu)
                        .with_context(|| format!("Cannot load chat model from '{}'", model_dir.display()))?
                        .with_max_new_tokens(max_new_tokens),
                )
            }
        };
        tracing::info!("Chat model loaded from '{}' on {}", model_dir.display(), device);
        Ok(Self::new(generator))
    }

    /// The message list the model actually sees.
    pub fn build_messages(&self, history: &[ChatMessage], message: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.as_str()));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(message));
        messages
    }

    pub fn chat(&self, history: &[ChatMessage], message: &str) -> Result<ChatReply> {
        let messages = self.build_messages(history, message);
        let text = {
            let mut generator = self.generator.lock();
            generator.generate_reply(&messages).map_err(|e| {
                tracing::error!("Generation failed: {e:#}");
                ButlerError::generation(format!("{e:#}"))
            })?
        };

        let reply = ChatReply::from_text(text);
        match reply.action {
            Some(tag) => tracing::info!("Reply carries command {}", tag),
            None      => tracing::debug!("Reply carries no command"),
        }
        Ok(reply)
    }
}
