// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application);
// `serve` additionally hands the services to the axum server.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::time::Duration;

use commands::{
    ChatArgs, Commands, InitBaseArgs, MergeArgs, ServeArgs, TrainArgs, TranscribeArgs,
};

/// Words that end the chat REPL.
const EXIT_WORDS: [&str; 3] = ["退出", "exit", "quit"];

#[derive(Parser, Debug)]
#[command(
    name = "home-butler",
    version,
    about = "Fine-tune a causal LM with LoRA into a household assistant that tags device commands, then chat with it or serve it."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::InitBase(args)   => run_init_base(args),
            Commands::Train(args)      => run_train(args),
            Commands::Merge(args)      => run_merge(args),
            Commands::Chat(args)       => run_chat(args),
            Commands::Serve(args)      => run_serve(args),
            Commands::Transcribe(args) => run_transcribe(args),
        }
    }
}

fn run_init_base(args: InitBaseArgs) -> Result<()> {
    use crate::application::init_base_use_case::InitBaseUseCase;

    let report = InitBaseUseCase::new(args.into()).execute()?;
    println!(
        "Base model written to {} (vocabulary: {} tokens).",
        report.output_dir.display(),
        report.vocab_size
    );
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting adapter training on '{}'", args.dataset.display());
    let report = TrainUseCase::new(args.into()).execute()?;

    println!(
        "Training complete: {} samples, final loss {:.4}. Adapter saved to {}.",
        report.samples,
        report.final_loss,
        report.adapter_dir.display()
    );
    if let Some(merged) = report.merged {
        println!("Merged model written to {}.", merged.output_dir.display());
    }
    Ok(())
}

fn run_merge(args: MergeArgs) -> Result<()> {
    use crate::application::merge_use_case::MergeUseCase;

    let report = MergeUseCase::new(args.base_model, args.adapter_dir, args.output_dir).execute()?;
    println!(
        "Merged {} projections ({} epochs of training) into {}.",
        report.merged_projections,
        report.epochs_completed,
        report.output_dir.display()
    );
    Ok(())
}

fn run_chat(args: ChatArgs) -> Result<()> {
    use crate::application::chat_use_case::ChatService;
    use crate::domain::chat::ChatMessage;

    let service = ChatService::load(&args.model_dir, args.device.into(), args.max_new_tokens)?;
    let mut history: Vec<ChatMessage> = Vec::new();

    println!("家居管家已就绪，输入“退出”结束对话。");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("你: ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else { break };
        let message = line.context("Cannot read from stdin")?;
        let message = message.trim();
        if message.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&message) {
            break;
        }

        match service.chat(&history, message) {
            Ok(reply) => {
                println!("管家: {}", reply.spoken_text());
                if let Some(action) = reply.action {
                    println!("      [action: {action}]");
                }
                history.push(ChatMessage::user(message));
                history.push(ChatMessage::assistant(reply.reply));
            }
            Err(e) => eprintln!("Error: {e:#}"),
        }
    }
    Ok(())
}

fn run_serve(args: ServeArgs) -> Result<()> {
    use crate::application::{
        chat_use_case::ChatService,
        transcribe_use_case::{CommandRecognizer, TranscriptionService},
    };
    use crate::server::{
        start_server,
        state::{ServerConfig, ServerState},
    };

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.host, args.port))?;

    let chat = ChatService::load(&args.model_dir, args.device.into(), args.max_new_tokens)?;
    let stt = match args.stt_command.as_deref() {
        Some(command) => Some(TranscriptionService::new(Box::new(CommandRecognizer::new(command)?))),
        None => None,
    };

    let config = ServerConfig {
        addr,
        request_timeout:  Duration::from_secs(args.request_timeout_secs),
        max_upload_bytes: args.max_upload_mb * 1024 * 1024,
    };
    let state = ServerState::new(chat, stt, config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Cannot start the async runtime")?;
    runtime.block_on(start_server(state))
}

fn run_transcribe(args: TranscribeArgs) -> Result<()> {
    use crate::application::transcribe_use_case::{CommandRecognizer, TranscriptionService};

    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("Cannot read '{}'", args.file.display()))?;
    let service = TranscriptionService::new(Box::new(CommandRecognizer::new(&args.stt_command)?));
    let text = service.transcribe(&bytes, Some(&args.language))?;
    println!("{text}");
    Ok(())
}
