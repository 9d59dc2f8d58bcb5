// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Reads a line-delimited JSON file into Samples.
//
// File format (one object per line, blank lines ignored):
//   {"question": "打开风扇", "answer": "好的，已为您打开风扇<|fan_on|>"}
//   {"question": "今天天气怎么样", "answer": "我无法获取实时天气……"}
//
// Extra fields are ignored. The first line that is not UTF-8, not
// valid JSON, or lacks a string `question`/`answer` aborts the whole load with
// ButlerError::DataFormat; nothing is skipped silently.
//
// Reference: Rust Book §9 (Error Handling)
//            serde_json documentation

use anyhow::{Context, Result};
use std::{
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
};

use crate::domain::errors::ButlerError;
use crate::domain::sample::Sample;
use crate::domain::traits::SampleSource;

/// Loads Samples from a JSONL file.
pub struct JsonlLoader {
    path: PathBuf,
}

impl JsonlLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SampleSource for JsonlLoader {
    fn load_all(&self) -> Result<Vec<Sample>> {
        let file = fs::File::open(&self.path)
            .with_context(|| format!("Cannot open dataset '{}'", self.path.display()))?;

        let mut samples = Vec::new();

        for (idx, raw) in BufReader::new(file).split(b'\n').enumerate() {
            let raw = raw
                .with_context(|| format!("Cannot read line {} of '{}'", idx + 1, self.path.display()))?;
            let line = String::from_utf8(raw).map_err(|e| ButlerError::DataFormat {
                path:   self.path.clone(),
                line:   idx + 1,
                reason: format!("invalid UTF-8: {e}"),
            })?;

            // Editors on Windows like to prepend a BOM to the first line
            let record = line.trim_start_matches('\u{feff}').trim();
            if record.is_empty() {
                continue;
            }

            let sample: Sample = serde_json::from_str(record).map_err(|e| ButlerError::DataFormat {
                path:   self.path.clone(),
                line:   idx + 1,
                reason: e.to_string(),
            })?;
            samples.push(sample);
        }

        tracing::info!("Loaded {} samples from '{}'", samples.len(), self.path.display());
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dataset(content: &str) -> tempfile::NamedTempFile {
        write_dataset_bytes(content.as_bytes())
    }

    fn write_dataset_bytes(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[test]
    fn test_loads_records_and_skips_blank_lines() {
        let file = write_dataset(
            "{\"question\":\"打开风扇\",\"answer\":\"好的，已为您打开风扇<|fan_on|>\"}\n\
             \n   \n\
             {\"question\":\"你好\",\"answer\":\"你好呀\",\"source\":\"manual\"}\n",
        );
        let samples = JsonlLoader::new(file.path()).load_all().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], Sample::new("打开风扇", "好的，已为您打开风扇<|fan_on|>"));
        assert_eq!(samples[1].question, "你好");
    }

    #[test]
    fn test_malformed_line_aborts_with_line_number() {
        let file = write_dataset(
            "{\"question\":\"a\",\"answer\":\"b\"}\n\
             not json at all\n\
             {\"question\":\"c\",\"answer\":\"d\"}\n",
        );
        let err = JsonlLoader::new(file.path()).load_all().unwrap_err();
        match err.downcast_ref::<ButlerError>() {
            Some(ButlerError::DataFormat { line, .. }) => assert_eq!(*line, 2),
            other => panic!("expected DataFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_utf8_line_is_a_format_error() {
        let file = write_dataset_bytes(
            b"{\"question\":\"a\",\"answer\":\"b\"}\n{\"question\":\"\xff\xfe\",\"answer\":\"c\"}\n",
        );
        let err = JsonlLoader::new(file.path()).load_all().unwrap_err();
        match err.downcast_ref::<ButlerError>() {
            Some(ButlerError::DataFormat { line, reason, .. }) => {
                assert_eq!(*line, 2);
                assert!(reason.contains("UTF-8"));
            }
            other => panic!("expected DataFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_crlf_line_endings_are_accepted() {
        let file = write_dataset("{\"question\":\"a\",\"answer\":\"b\"}\r\n{\"question\":\"c\",\"answer\":\"d\"}\r\n");
        let samples = JsonlLoader::new(file.path()).load_all().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1], Sample::new("c", "d"));
    }

    #[test]
    fn test_missing_field_is_a_format_error() {
        let file = write_dataset("{\"question\":\"only a question\"}\n");
        let err  = JsonlLoader::new(file.path()).load_all().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ButlerError>(),
            Some(ButlerError::DataFormat { line: 1, .. })
        ));
    }

    #[test]
    fn test_non_string_field_is_a_format_error() {
        let file = write_dataset("{\"question\":\"q\",\"answer\":42}\n");
        let err  = JsonlLoader::new(file.path()).load_all().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ButlerError>(),
            Some(ButlerError::DataFormat { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = JsonlLoader::new("/definitely/not/here.jsonl").load_all().unwrap_err();
        assert!(err.to_string().contains("Cannot open dataset"));
    }
}
