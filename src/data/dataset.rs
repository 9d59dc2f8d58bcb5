// ============================================================
// Layer 4 — Sample Dataset
// ============================================================
// Holds the loaded Samples in memory and hands out one epoch's
// worth of batches at a time.
//
// Every call to `epoch_batches` reshuffles the indices and cuts
// them into consecutive chunks, so within an epoch each sample is
// drawn exactly once (without replacement); the final batch may be
// smaller than batch_size.
//
// Reference: Rust Book §13 (Iterators and Closures)
//            rand::seq::SliceRandom

use rand::{rngs::StdRng, seq::SliceRandom};

use crate::domain::sample::Sample;

pub struct SampleDataset {
    samples: Vec<Sample>,
}

impl SampleDataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Number of batches one epoch yields.
    pub fn batches_per_epoch(&self, batch_size: usize) -> usize {
        self.samples.len().div_ceil(batch_size.max(1))
    }

    /// Shuffle and split into batches for one epoch.
    pub fn epoch_batches(&self, batch_size: usize, rng: &mut StdRng) -> Vec<Vec<&Sample>> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        order.shuffle(rng);
        order
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.iter().map(|&i| &self.samples[i]).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn dataset(n: usize) -> SampleDataset {
        SampleDataset::new((0..n).map(|i| Sample::new(format!("q{i}"), format!("a{i}"))).collect())
    }

    #[test]
    fn test_each_sample_drawn_once_per_epoch() {
        let ds  = dataset(10);
        let mut rng = StdRng::seed_from_u64(7);
        let batches = ds.epoch_batches(3, &mut rng);

        assert_eq!(batches.len(), 4);
        assert_eq!(batches.last().unwrap().len(), 1);
        let seen: HashSet<&str> = batches.iter().flatten().map(|s| s.question.as_str()).collect();
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn test_reshuffles_between_epochs() {
        let ds  = dataset(32);
        let mut rng = StdRng::seed_from_u64(42);
        let first:  Vec<&str> = ds.epoch_batches(32, &mut rng)[0].iter().map(|s| s.question.as_str()).collect();
        let second: Vec<&str> = ds.epoch_batches(32, &mut rng)[0].iter().map(|s| s.question.as_str()).collect();
        assert_ne!(first, second);
    }

    #[test]
    fn test_batches_per_epoch_rounds_up() {
        assert_eq!(dataset(10).batches_per_epoch(4), 3);
        assert_eq!(dataset(0).batches_per_epoch(4), 0);
    }
}
