// ============================================================
// Layer 3 — Sample Domain Types
// ============================================================
// A Sample is one supervised (question, answer) pair exactly as
// it appears in the dataset file. An EncodedExample is the
// token-level form the training loop consumes:
//
//   input_ids      = prompt ids ++ answer ids ++ [pad]
//   attention_mask = 1 for every real position
//   labels         = IGNORE_INDEX over the prompt span,
//                    true ids over answer ids ++ [pad]
//
// Example (ids are illustrative):
//   prompt  → [10, 11, 12]      answer → [40, 41]     pad → 0
//   input_ids      [10, 11, 12, 40, 41, 0]
//   attention_mask [ 1,  1,  1,  1,  1, 1]
//   labels         [-100, -100, -100, 40, 41, 0]
//
// Reference: Rust Book §5 (Structs)

use serde::{Deserialize, Serialize};

/// Label value meaning "excluded from the loss".
pub const IGNORE_INDEX: i64 = -100;

/// One question/answer record. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub question: String,
    pub answer:   String,
}

impl Sample {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer:   answer.into(),
        }
    }
}

/// A loss-masked training example.
///
/// All three sequences have the same length. Built per batch and
/// dropped after the optimiser step; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedExample {
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub labels:         Vec<i64>,
}

impl EncodedExample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of leading positions excluded from the loss.
    pub fn prompt_len(&self) -> usize {
        self.labels.iter().take_while(|&&l| l == IGNORE_INDEX).count()
    }

    /// Number of positions that contribute to the loss.
    pub fn supervised_len(&self) -> usize {
        self.labels.iter().filter(|&&l| l != IGNORE_INDEX).count()
    }

    /// True when the three sequences line up.
    pub fn is_aligned(&self) -> bool {
        self.input_ids.len() == self.attention_mask.len()
            && self.input_ids.len() == self.labels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> EncodedExample {
        EncodedExample {
            input_ids:      vec![10, 11, 12, 40, 41, 0],
            attention_mask: vec![1; 6],
            labels:         vec![IGNORE_INDEX, IGNORE_INDEX, IGNORE_INDEX, 40, 41, 0],
        }
    }

    #[test]
    fn test_prompt_and_supervised_spans() {
        let ex = example();
        assert!(ex.is_aligned());
        assert_eq!(ex.prompt_len(), 3);
        assert_eq!(ex.supervised_len(), 3);
    }

    #[test]
    fn test_sample_deserialises_from_json() {
        let s: Sample = serde_json::from_str(r#"{"question":"打开风扇","answer":"好的"}"#).unwrap();
        assert_eq!(s, Sample::new("打开风扇", "好的"));
    }
}
