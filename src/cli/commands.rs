// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the six subcommands and all their configurable flags:
//
//   init-base   scaffold a small random base model + tokenizer
//   train       fine-tune a LoRA adapter (optionally merge)
//   merge       fold an adapter into its base model
//   chat        interactive REPL over a merged model
//   serve       HTTP chat + speech-to-text server
//   transcribe  one-off speech-to-text for a WAV file
//
// `serve` and `transcribe` also read their options from the
// environment (BUTLER_*), so a service unit needs no arguments.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::application::{
    init_base_use_case::InitBaseConfig,
    train_use_case::TrainConfig,
    transcribe_use_case::DEFAULT_LANGUAGE,
};
use crate::ml::{inferencer::MAX_NEW_TOKENS, lora::LoraConfig, ComputeDevice};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a randomly initialised base model and tokenizer from a dataset
    InitBase(InitBaseArgs),

    /// Fine-tune a LoRA adapter on a JSONL dataset
    Train(TrainArgs),

    /// Merge a trained adapter into its base model
    Merge(MergeArgs),

    /// Chat with a merged model in the terminal
    Chat(ChatArgs),

    /// Serve /chat/, /stt/ and /health over HTTP
    Serve(ServeArgs),

    /// Transcribe a WAV file with the configured speech recogniser
    Transcribe(TranscribeArgs),
}

/// Compute backend selectable on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum DeviceArg {
    #[default]
    Cpu,
    Wgpu,
}

impl From<DeviceArg> for ComputeDevice {
    fn from(d: DeviceArg) -> Self {
        match d {
            DeviceArg::Cpu  => ComputeDevice::Cpu,
            DeviceArg::Wgpu => ComputeDevice::Wgpu,
        }
    }
}

// ─── init-base ────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct InitBaseArgs {
    /// JSONL dataset whose text seeds the vocabulary
    #[arg(long, default_value = "data/train.jsonl")]
    pub dataset: PathBuf,

    /// Where to write config.json, model.mpk.gz and tokenizer.json
    #[arg(long, default_value = "models/base")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 256)]
    pub d_model: usize,

    /// d_model must be divisible by num_heads
    #[arg(long, default_value_t = 4)]
    pub num_heads: usize,

    #[arg(long, default_value_t = 4)]
    pub num_layers: usize,

    #[arg(long, default_value_t = 1024)]
    pub d_ff: usize,

    #[arg(long, default_value_t = 2048)]
    pub max_position_embeddings: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl From<InitBaseArgs> for InitBaseConfig {
    fn from(a: InitBaseArgs) -> Self {
        InitBaseConfig {
            dataset:    a.dataset,
            output_dir: a.output_dir,
            d_model:    a.d_model,
            num_heads:  a.num_heads,
            num_layers: a.num_layers,
            d_ff:       a.d_ff,
            max_position_embeddings: a.max_position_embeddings,
            seed:       a.seed,
        }
    }
}

// ─── train ────────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSONL file with one {"question", "answer"} object per line
    #[arg(long, default_value = "data/train.jsonl")]
    pub dataset: PathBuf,

    /// Base model directory (config.json, model.mpk.gz, tokenizer.json)
    #[arg(long, default_value = "models/base")]
    pub base_model: PathBuf,

    /// Where the adapter is written after every epoch
    #[arg(long, default_value = "output/adapter")]
    pub adapter_dir: PathBuf,

    /// metrics.csv is appended here
    #[arg(long, default_value = "output/logs")]
    pub log_dir: PathBuf,

    #[arg(long, default_value_t = 3)]
    pub epochs: usize,

    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    /// Token limit for each of prompt and answer
    #[arg(long, default_value_t = 512)]
    pub max_len: usize,

    /// Shuffle seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// LoRA rank r
    #[arg(long, default_value_t = 8)]
    pub lora_rank: usize,

    /// LoRA alpha; updates are scaled by alpha / r
    #[arg(long, default_value_t = 32.0)]
    pub lora_alpha: f64,

    #[arg(long, default_value_t = 0.1)]
    pub lora_dropout: f64,

    /// Comma-separated projection names to adapt
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "q_proj,k_proj,v_proj,o_proj,gate_proj,up_proj,down_proj"
    )]
    pub target_modules: Vec<String>,

    #[arg(long, value_enum, default_value_t = DeviceArg::Cpu)]
    pub device: DeviceArg,

    /// Merge the finished adapter into a full model at this directory
    #[arg(long)]
    pub merge_into: Option<PathBuf>,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            dataset:       a.dataset,
            base_model:    a.base_model,
            adapter_dir:   a.adapter_dir,
            log_dir:       a.log_dir,
            epochs:        a.epochs,
            learning_rate: a.lr,
            batch_size:    a.batch_size,
            max_len:       a.max_len,
            seed:          a.seed,
            lora: LoraConfig {
                rank:           a.lora_rank,
                alpha:          a.lora_alpha,
                dropout:        a.lora_dropout,
                target_modules: a.target_modules,
            },
            device:        a.device.into(),
            merge_into:    a.merge_into,
        }
    }
}

// ─── merge ────────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct MergeArgs {
    #[arg(long, default_value = "models/base")]
    pub base_model: PathBuf,

    #[arg(long, default_value = "output/adapter")]
    pub adapter_dir: PathBuf,

    /// Must differ from both inputs
    #[arg(long, default_value = "output/merged")]
    pub output_dir: PathBuf,
}

// ─── chat ─────────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Merged model directory
    #[arg(long, default_value = "output/merged")]
    pub model_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = DeviceArg::Cpu)]
    pub device: DeviceArg,

    #[arg(long, default_value_t = MAX_NEW_TOKENS)]
    pub max_new_tokens: usize,
}

// ─── serve ────────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Merged model directory
    #[arg(long, env = "BUTLER_MODEL_DIR", default_value = "output/merged")]
    pub model_dir: PathBuf,

    #[arg(long, env = "BUTLER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "BUTLER_PORT", default_value_t = 8000)]
    pub port: u16,

    #[arg(long, env = "BUTLER_DEVICE", value_enum, default_value_t = DeviceArg::Cpu)]
    pub device: DeviceArg,

    #[arg(long, env = "BUTLER_MAX_NEW_TOKENS", default_value_t = MAX_NEW_TOKENS)]
    pub max_new_tokens: usize,

    /// Speech recogniser command line; must contain {wav}, may contain {lang}.
    /// Without it /stt/ answers 503.
    #[arg(long, env = "BUTLER_STT_COMMAND")]
    pub stt_command: Option<String>,

    #[arg(long, env = "BUTLER_REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    pub request_timeout_secs: u64,

    /// Largest accepted upload in MiB
    #[arg(long, env = "BUTLER_MAX_UPLOAD_MB", default_value_t = 25)]
    pub max_upload_mb: usize,
}

// ─── transcribe ───────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct TranscribeArgs {
    /// WAV file to transcribe
    pub file: PathBuf,

    #[arg(long, default_value = DEFAULT_LANGUAGE)]
    pub language: String,

    /// Speech recogniser command line; must contain {wav}
    #[arg(long, env = "BUTLER_STT_COMMAND")]
    pub stt_command: String,
}
