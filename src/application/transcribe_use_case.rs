// ============================================================
// Layer 2 — TranscriptionService
// ============================================================
// Speech-to-text for one uploaded audio payload:
//
//   bytes → infra::audio::prepare_clip (16 kHz mono, 30 s)
//         → SpeechRecognizer::transcribe(samples, language)
//         → trimmed text
//
// The recogniser is behind a parking_lot::Mutex like the chat
// generator: one transcription at a time per loaded model.
//
// CommandRecognizer is the bundled recogniser. It re-encodes the
// clip as 16-bit PCM WAV and runs an external speech-to-text
// program (e.g. whisper.cpp's `whisper-cli`), substituting:
//
//   {wav}   path of the temporary WAV file
//   {lang}  requested language code
//
// and returns whatever the program prints on stdout.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::process::Command;

use crate::domain::{errors::ButlerError, traits::SpeechRecognizer};
use crate::infra::audio::{self, TARGET_SAMPLE_RATE};

pub const DEFAULT_LANGUAGE: &str = "zh";

pub struct TranscriptionService {
    recognizer: Mutex<Box<dyn SpeechRecognizer>>,
}

impl TranscriptionService {
    pub fn new(recognizer: Box<dyn SpeechRecognizer>) -> Self {
        Self { recognizer: Mutex::new(recognizer) }
    }

    pub fn transcribe(&self, bytes: &[u8], language: Option<&str>) -> Result<String> {
        let language = language
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_LANGUAGE);
        let clip = audio::prepare_clip(bytes)?;

        let text = self.recognizer.lock().transcribe(&clip, language)?;
        let text = text.trim().to_string();
        tracing::info!("Transcribed {} bytes ({}): '{}'", bytes.len(), language, text);
        Ok(text)
    }
}

// ─── CommandRecognizer ────────────────────────────────────────────────────────
pub struct CommandRecognizer {
    program: String,
    args:    Vec<String>,
}

impl CommandRecognizer {
    /// `command_line` is split on whitespace; the first word is the program.
    pub fn new(command_line: &str) -> Result<Self, ButlerError> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| ButlerError::invalid_config("speech recognition command is empty"))?;
        let args: Vec<String> = words.collect();
        if !args.iter().any(|a| a.contains("{wav}")) {
            return Err(ButlerError::invalid_config(
                "speech recognition command must reference the audio file as {wav}",
            ));
        }
        Ok(Self { program, args })
    }
}

impl SpeechRecognizer for CommandRecognizer {
    fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<String> {
        let wav = tempfile::Builder::new()
            .prefix("butler-stt-")
            .suffix(".wav")
            .tempfile()
            .context("Cannot create temporary WAV file")?;
        audio::write_wav16(wav.path(), samples, TARGET_SAMPLE_RATE)?;

        let wav_path = wav.path().to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{wav}", &wav_path).replace("{lang}", language))
            .collect();

        tracing::debug!("Running {} {:?}", self.program, args);
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .with_context(|| format!("Cannot start speech recogniser '{}'", self.program))?;

        if !output.status.success() {
            anyhow::bail!(
                "speech recogniser '{}' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
