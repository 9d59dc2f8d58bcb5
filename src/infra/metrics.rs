// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:             the epoch number (1, 2, 3, ...)
//   - train_loss:        mean masked cross-entropy over the batches
//   - batches:           optimiser steps taken in the epoch
//   - supervised_tokens: answer + terminator tokens that reached the loss
//
// Output file: <log_dir>/metrics.csv, appended across runs.
//
// Example CSV output:
//   epoch,train_loss,batches,supervised_tokens
//   1,6.912300,120,2310
//   2,4.105800,120,2310
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

pub const METRICS_FILE: &str = "metrics.csv";
const HEADER: &str = "epoch,train_loss,batches,supervised_tokens";

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Mean loss over the epoch's batches. NaN if there were none.
    pub train_loss: f64,

    pub batches: usize,

    pub supervised_tokens: usize,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, batches: usize, supervised_tokens: usize) -> Self {
        Self { epoch, train_loss, batches, supervised_tokens }
    }

    /// Returns true if this epoch's loss beats `best_loss`
    pub fn is_improvement(&self, best_loss: f64) -> bool {
        self.train_loss < best_loss
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the log directory and write the CSV header if the file is new.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create log directory '{}'", dir.display()))?;

        let csv_path = dir.join(METRICS_FILE);
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        writeln!(
            f,
            "{},{:.6},{},{}",
            m.epoch,
            m.train_loss,
            m.batches,
            m.supervised_tokens,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, supervised_tokens={}",
            m.epoch,
            m.train_loss,
            m.supervised_tokens,
        );

        Ok(())
    }

    /// Return the path to the metrics CSV file
    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_improvement() {
        let m = EpochMetrics::new(2, 2.3, 10, 100);
        assert!(m.is_improvement(3.0));
        assert!(!m.is_improvement(2.0));
    }

    #[test]
    fn test_rows_are_appended_across_loggers() {
        let dir = tempfile::tempdir().unwrap();
        MetricsLogger::new(dir.path()).unwrap().log(&EpochMetrics::new(1, 1.5, 3, 40)).unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&EpochMetrics::new(2, 1.25, 3, 40)).unwrap();

        let csv = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec![HEADER, "1,1.500000,3,40", "2,1.250000,3,40"]);
    }
}
