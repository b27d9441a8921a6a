use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MimcError;
use crate::routines::indexset::IndexSet;
use crate::structs::moments::Moments;
use crate::structs::multi_index::MultiIndex;

/// Aggregate statistics of one active multi-index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelStats {
    /// Moments of the mixed difference at this index
    delta: Moments,
    /// Moments of the raw quantity of interest at this index
    fine: Moments,
    /// Summed stencil cost over all difference samples
    work: f64,
    /// Cost actually spent on evaluations at this index
    spent: f64,
    /// Number of seeds drawn from the seed stream
    drawn: u64,
    /// Seeds whose difference sample failed and is still outstanding
    retry: Vec<u64>,
    fixed: bool,
}

impl LevelStats {
    pub fn count(&self) -> usize {
        self.delta.count()
    }

    pub fn delta(&self) -> &Moments {
        &self.delta
    }

    pub fn fine(&self) -> &Moments {
        &self.fine
    }

    /// Norm of the mean mixed difference, `E`
    pub fn expectation(&self) -> f64 {
        self.delta.mean_norm()
    }

    /// Variance of the mixed difference, `V`
    pub fn variance(&self) -> Option<f64> {
        self.delta.variance_norm()
    }

    pub fn fine_variance(&self) -> Option<f64> {
        self.fine.variance_norm()
    }

    /// Work per difference sample, `W`
    pub fn work(&self) -> Option<f64> {
        match self.count() {
            0 => None,
            n => Some(self.work / n as f64),
        }
    }

    pub fn spent(&self) -> f64 {
        self.spent
    }

    pub fn drawn(&self) -> u64 {
        self.drawn
    }

    pub fn pending_retries(&self) -> &[u64] {
        &self.retry
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Add one completed difference sample
    pub fn push(&mut self, delta: &[f64], fine: &[f64], work: f64) -> Result<(), MimcError> {
        self.delta.push(delta)?;
        self.fine.push(fine)?;
        self.work += work;
        Ok(())
    }

    pub fn add_spent(&mut self, cost: f64) {
        self.spent += cost;
    }

    /// Hand out `n` seeds, outstanding retries first
    pub fn reserve(&mut self, n: usize, mut seed_for: impl FnMut(u64) -> u64) -> Vec<u64> {
        let retried = self.retry.len().min(n);
        let mut seeds: Vec<u64> = self.retry.drain(..retried).collect();
        while seeds.len() < n {
            seeds.push(seed_for(self.drawn));
            self.drawn += 1;
        }
        seeds
    }

    /// Keep a seed for a later attempt
    pub fn defer(&mut self, seed: u64) {
        if !self.retry.contains(&seed) {
            self.retry.push(seed);
        }
    }
}

/// The active index set together with the statistics of every active index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexProfile {
    set: IndexSet,
    stats: BTreeMap<MultiIndex, LevelStats>,
}

impl IndexProfile {
    pub fn new(dim: usize, max_level: u32) -> Self {
        IndexProfile {
            set: IndexSet::new(dim, max_level),
            stats: BTreeMap::new(),
        }
    }

    pub fn set(&self) -> &IndexSet {
        &self.set
    }

    pub fn dim(&self) -> usize {
        self.set.dim()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Activate an admissible index with empty statistics
    pub fn activate(&mut self, index: &MultiIndex) -> Result<(), MimcError> {
        self.set.activate(index)?;
        self.stats.entry(index.clone()).or_default();
        Ok(())
    }

    /// Activate an index without requiring its predecessors
    pub fn fix(&mut self, index: &MultiIndex) -> Result<(), MimcError> {
        self.set.fix(index)?;
        self.stats.entry(index.clone()).or_default().fixed = true;
        Ok(())
    }

    pub fn stats(&self, index: &MultiIndex) -> Option<&LevelStats> {
        self.stats.get(index)
    }

    pub fn stats_mut(&mut self, index: &MultiIndex) -> Option<&mut LevelStats> {
        self.stats.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MultiIndex, &LevelStats)> {
        self.stats.iter()
    }

    /// Whether the index is active and has at least one difference sample
    pub fn is_sampled(&self, index: &MultiIndex) -> bool {
        self.stats.get(index).map_or(false, |s| s.count() > 0)
    }

    pub fn total_samples(&self) -> usize {
        self.stats.values().map(|s| s.count()).sum()
    }

    pub fn total_spent(&self) -> f64 {
        self.stats.values().map(|s| s.spent()).sum()
    }

    /// The MIMC estimate, the sum of the mean differences over all sampled indices
    pub fn estimate(&self) -> Vec<f64> {
        let mut estimate: Vec<f64> = Vec::new();
        for stats in self.stats.values().filter(|s| s.count() > 0) {
            let mean = stats.delta.mean();
            if estimate.is_empty() {
                estimate = vec![0.0; mean.len()];
            }
            for (e, m) in estimate.iter_mut().zip(mean) {
                *e += m;
            }
        }
        estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_hands_out_retries_first() {
        let mut stats = LevelStats::default();
        let first = stats.reserve(3, |k| 100 + k);
        assert_eq!(first, vec![100, 101, 102]);

        stats.defer(101);
        stats.defer(101);
        let second = stats.reserve(2, |k| 100 + k);
        assert_eq!(second, vec![101, 103]);
        assert_eq!(stats.drawn(), 4);
        assert!(stats.pending_retries().is_empty());
    }

    #[test]
    fn test_work_is_per_sample() {
        let mut stats = LevelStats::default();
        assert!(stats.work().is_none());
        stats.push(&[1.0], &[2.0], 3.0).unwrap();
        stats.push(&[2.0], &[3.0], 5.0).unwrap();
        assert_eq!(stats.work(), Some(4.0));
        assert!((stats.expectation() - 1.5).abs() < 1e-12);
        assert!((stats.variance().unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_sums_sampled_differences() {
        let mut profile = IndexProfile::new(1, 10);
        let zero = MultiIndex::zero(1);
        let one = MultiIndex::new(vec![1]);
        profile.activate(&zero).unwrap();
        profile.activate(&one).unwrap();
        profile
            .stats_mut(&zero)
            .unwrap()
            .push(&[2.0], &[2.0], 1.0)
            .unwrap();
        assert_eq!(profile.estimate(), vec![2.0]);

        profile
            .stats_mut(&one)
            .unwrap()
            .push(&[-0.5], &[1.5], 3.0)
            .unwrap();
        assert_eq!(profile.estimate(), vec![1.5]);
        assert!(profile.is_sampled(&one));
    }

    #[test]
    fn test_activation_requires_predecessors() {
        let mut profile = IndexProfile::new(2, 10);
        let err = profile.activate(&MultiIndex::new(vec![1, 0])).unwrap_err();
        assert!(err.is_fatal());
        profile.fix(&MultiIndex::new(vec![1, 0])).unwrap();
        assert!(profile
            .stats(&MultiIndex::new(vec![1, 0]))
            .unwrap()
            .is_fixed());
    }
}
