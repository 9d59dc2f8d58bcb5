// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads, saves and (for scaffolding) builds the tokenizer that
// travels with every model and adapter directory as
// `tokenizer.json`.
//
// A real base checkpoint ships its own tokenizer.json and only
// load/save are used. `build_bootstrap` writes a small word-level
// tokenizer directly as HuggingFace JSON so `init-base` can run the
// whole pipeline without downloading anything:
//
//   ids 0..=2   chat-template specials  <|endoftext|> <|im_start|> <|im_end|>
//   id  3       [UNK]
//   ids 4..     command markers, one atomic token each, NOT special
//   rest        CJK characters, words and punctuation runs from the corpus
//
// Command markers are added tokens with special=false, so decoding
// with skip_special_tokens keeps them verbatim in the reply.
// The word-level decoder joins pieces with spaces; `tidy_decoded`
// removes the ones next to CJK text and around markers.
//
// Reference: HuggingFace tokenizers JSON format

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokenizers::Tokenizer;

use crate::data::template::{END_OF_TEXT, IM_END, TEMPLATE_SPECIAL_TOKENS};
use crate::domain::command_tag::CommandTag;

pub const TOKENIZER_FILE: &str = "tokenizer.json";
const UNK_TOKEN: &str = "[UNK]";

pub struct TokenizerStore {
    dir: PathBuf,
}

/// Ids the pipeline needs to know by role rather than by text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialTokenIds {
    /// Appended after every answer and used to pad batches.
    pub pad:  u32,
    /// Generation stops when any of these is produced.
    pub stop: Vec<u32>,
}

impl SpecialTokenIds {
    pub fn resolve(tokenizer: &Tokenizer) -> Result<Self> {
        let pad = tokenizer
            .token_to_id(END_OF_TEXT)
            .with_context(|| format!("Tokenizer has no '{END_OF_TEXT}' token to pad with"))?;
        let stop = [IM_END, END_OF_TEXT]
            .iter()
            .filter_map(|t| tokenizer.token_to_id(t))
            .collect();
        Ok(Self { pad, stop })
    }
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(TOKENIZER_FILE)
    }

    /// Load the tokenizer stored in this directory.
    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.path();
        Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))
    }

    /// Write `tokenizer` into this directory, replacing any previous file.
    pub fn save(&self, tokenizer: &Tokenizer) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;
        let path = self.path();
        tokenizer
            .save(&path, true)
            .map_err(|e| anyhow::anyhow!("Cannot write tokenizer to '{}': {}", path.display(), e))
    }

    /// Build a word-level tokenizer covering `texts` and save it.
    pub fn build_bootstrap(&self, texts: &[String]) -> Result<Tokenizer> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        let markers = CommandTag::all_markers();

        // ── Step 1: reserved tokens ──────────────────────────────────────────
        let mut vocab: BTreeMap<String, u32> = BTreeMap::new();
        let mut added_tokens = Vec::new();
        let mut next_id = 0u32;

        for token in TEMPLATE_SPECIAL_TOKENS.iter().copied().chain([UNK_TOKEN]) {
            vocab.insert(token.to_string(), next_id);
            added_tokens.push(added_token_json(next_id, token, true));
            next_id += 1;
        }
        for marker in &markers {
            vocab.insert(marker.clone(), next_id);
            added_tokens.push(added_token_json(next_id, marker, false));
            next_id += 1;
        }

        // ── Step 2: corpus pieces by frequency ───────────────────────────────
        // Reserved strings are cut out first so "<|fan_on|>" does not
        // also contribute "<|", "fan_on" and "|>" to the vocabulary.
        let reserved: Vec<String> = TEMPLATE_SPECIAL_TOKENS
            .iter()
            .map(|s| s.to_string())
            .chain(markers.iter().cloned())
            .collect();
        let mut freq: BTreeMap<String, usize> = BTreeMap::new();
        for text in texts {
            let mut text = text.clone();
            for token in &reserved {
                text = text.replace(token.as_str(), " ");
            }
            for piece in vocab_pieces(&text) {
                *freq.entry(piece).or_insert(0) += 1;
            }
        }
        let mut pieces: Vec<(String, usize)> = freq.into_iter().collect();
        // Stable sort keeps equal-frequency pieces in lexical order
        pieces.sort_by(|a, b| b.1.cmp(&a.1));
        for (piece, _) in pieces {
            if !vocab.contains_key(&piece) {
                vocab.insert(piece, next_id);
                next_id += 1;
            }
        }

        // ── Step 3: write HuggingFace tokenizer JSON ─────────────────────────
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": false
            },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": UNK_TOKEN
            }
        });

        let path = self.path();
        std::fs::write(&path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))?;

        tracing::info!("Bootstrap tokenizer built with {} tokens at '{}'", next_id, path.display());
        self.load()
    }
}

fn added_token_json(id: u32, content: &str, special: bool) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "content": content,
        "single_word": false,
        "lstrip": false,
        "rstrip": false,
        "normalized": false,
        "special": special
    })
}

/// Split text the same way BertNormalizer + Whitespace will: every CJK
/// ideograph alone, runs of word characters, runs of punctuation.
fn vocab_pieces(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut word   = String::new();
    let mut punct  = String::new();

    fn flush(buf: &mut String, out: &mut Vec<String>) {
        if !buf.is_empty() {
            out.push(std::mem::take(buf));
        }
    }

    for c in text.chars() {
        if is_cjk(c) {
            flush(&mut word, &mut pieces);
            flush(&mut punct, &mut pieces);
            pieces.push(c.to_string());
        } else if c.is_alphanumeric() || c == '_' {
            flush(&mut punct, &mut pieces);
            word.push(c);
        } else if c.is_whitespace() || c.is_control() {
            flush(&mut word, &mut pieces);
            flush(&mut punct, &mut pieces);
        } else {
            flush(&mut word, &mut pieces);
            punct.push(c);
        }
    }
    flush(&mut word, &mut pieces);
    flush(&mut punct, &mut pieces);
    pieces
}

/// Drop the spaces a word-level decode puts between CJK characters,
/// full-width punctuation and command markers. Spaces between Latin
/// words stay.
pub fn tidy_decoded(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].is_whitespace() {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let prev = out.chars().last();
        let next = chars.get(i).copied();

        let glued = prev.is_some_and(is_wide)
            || next.is_some_and(is_wide)
            || out.ends_with("|>")
            || chars[i..].starts_with(&['<', '|']);
        if !glued {
            out.extend(&chars[start..i]);
        }
    }
    out
}

/// CJK ideographs plus CJK and full-width punctuation.
fn is_wide(c: char) -> bool {
    is_cjk(c) || matches!(c as u32, 0x3000..=0x303F | 0xFF00..=0xFFEF)
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF
        | 0x3400..=0x4DBF
        | 0x20000..=0x2A6DF
        | 0x2A700..=0x2B73F
        | 0x2B740..=0x2B81F
        | 0x2B820..=0x2CEAF
        | 0xF900..=0xFAFF
        | 0x2F800..=0x2FA1F)
}

/// Texts the bootstrap tokenizer must cover besides the dataset:
/// template role names and the serving system prompt.
pub fn bootstrap_extra_texts() -> Vec<String> {
    vec![
        "system user assistant".to_string(),
        crate::domain::command_tag::system_prompt(),
    ]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::template::IM_START;
    use std::path::Path;

    /// A bootstrap tokenizer covering the household examples used in tests.
    pub(crate) fn test_tokenizer(dir: &Path) -> Tokenizer {
        let mut texts = vec![
            "打开风扇 好的，已为您打开风扇".to_string(),
            "把灯关掉 好的，灯已关闭".to_string(),
            "你好 今天天气不错".to_string(),
        ];
        texts.extend(bootstrap_extra_texts());
        TokenizerStore::new(dir).build_bootstrap(&texts).unwrap()
    }

    #[test]
    fn test_vocab_pieces_split_cjk_words_and_punct() {
        assert_eq!(
            vocab_pieces("打开fan_on 2次，好!!"),
            vec!["打", "开", "fan_on", "2", "次", "，", "好", "!!"]
        );
    }

    #[test]
    fn test_markers_are_atomic_and_survive_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let tok = test_tokenizer(dir.path());

        let enc = tok.encode("好的<|fan_on|>", false).unwrap();
        let fan_on = tok.token_to_id("<|fan_on|>").unwrap();
        assert_eq!(enc.get_ids().last(), Some(&fan_on));

        let decoded = tok.decode(enc.get_ids(), true).unwrap();
        assert!(decoded.ends_with("<|fan_on|>"));
    }

    #[test]
    fn test_template_tokens_are_special() {
        let dir = tempfile::tempdir().unwrap();
        let tok = test_tokenizer(dir.path());

        let enc = tok.encode("<|im_start|>user\n你好<|im_end|>", false).unwrap();
        assert_eq!(enc.get_ids()[0], tok.token_to_id(IM_START).unwrap());
        let decoded = tok.decode(enc.get_ids(), true).unwrap();
        assert!(!decoded.contains(IM_START));
        assert!(!decoded.contains(IM_END));
    }

    #[test]
    fn test_tidy_joins_cjk_and_markers_but_not_words() {
        assert_eq!(tidy_decoded("好 的 ， 已 为 您 打 开 风 扇 <|fan_on|>"), "好的，已为您打开风扇<|fan_on|>");
        assert_eq!(tidy_decoded("turn on the fan"), "turn on the fan");
        assert_eq!(tidy_decoded("已 打 开 wifi 了"), "已打开wifi了");
        assert_eq!(tidy_decoded("<|light_on|> ok"), "<|light_on|>ok");
        assert_eq!(tidy_decoded(""), "");
    }

    #[test]
    fn test_tidied_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let tok = test_tokenizer(dir.path());

        let text    = "好的，已为您打开风扇<|fan_on|>";
        let enc     = tok.encode(text, false).unwrap();
        let decoded = tok.decode(enc.get_ids(), true).unwrap();
        assert_eq!(tidy_decoded(&decoded), text);
    }

    #[test]
    fn test_round_trip_modulo_spacing() {
        let dir = tempfile::tempdir().unwrap();
        let tok = test_tokenizer(dir.path());

        let text    = "好的，已为您打开风扇";
        let enc     = tok.encode(text, false).unwrap();
        let decoded = tok.decode(enc.get_ids(), true).unwrap();
        let squash  = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        assert_eq!(squash(&decoded), squash(text));
    }

    #[test]
    fn test_special_ids_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let tok = test_tokenizer(dir.path());
        let ids = SpecialTokenIds::resolve(&tok).unwrap();
        assert_eq!(ids.pad, 0);
        assert_eq!(ids.stop, vec![2, 0]);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let tok = test_tokenizer(dir.path());
        let out = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(out.path());
        store.save(&tok).unwrap();
        assert_eq!(store.load().unwrap().get_vocab_size(true), tok.get_vocab_size(true));
    }
}
