use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::routines::estimation::{ErrorEstimator, Prediction, Rates};
use crate::routines::settings::Settings;
use crate::structs::multi_index::MultiIndex;
use crate::structs::profile::IndexProfile;

/// Decides how many samples to add per index and which indices to activate
#[derive(Debug, Clone)]
pub struct WorkAllocator {
    warmup: usize,
    max_batch: usize,
}

impl WorkAllocator {
    pub fn new(settings: &Settings) -> Self {
        WorkAllocator {
            warmup: settings.sampling.warmup,
            max_batch: settings.sampling.max_batch,
        }
    }

    pub fn warmup(&self) -> usize {
        self.warmup
    }

    /// Additional samples per active index to reach `Σ V/N = variance_budget` at minimal cost
    ///
    /// The optimal counts are `N_i = ⌈S·sqrt(V_i/W_i)/B⌉` with `S = Σ_j sqrt(V_j·W_j)`.
    /// Indices without a variance estimate get the warm-up count instead. The result never asks
    /// an index to drop below its current count, and indices in `skip` are left out.
    pub fn optimal_samples(
        &self,
        profile: &IndexProfile,
        variance_budget: f64,
        skip: &BTreeSet<MultiIndex>,
    ) -> BTreeMap<MultiIndex, usize> {
        let known: Vec<(&MultiIndex, usize, f64, f64)> = profile
            .iter()
            .filter_map(|(index, stats)| match (stats.variance(), stats.work()) {
                (Some(v), Some(w)) => Some((index, stats.count(), v, w.max(f64::EPSILON))),
                _ => None,
            })
            .collect();
        let s: f64 = known.iter().map(|(_, _, v, w)| (v * w).sqrt()).sum();

        let mut additional = BTreeMap::new();
        for (index, stats) in profile.iter() {
            if skip.contains(index) {
                continue;
            }
            let target = match known.iter().find(|(i, ..)| *i == index) {
                Some(&(_, _, v, w)) if variance_budget > 0.0 && variance_budget.is_finite() => {
                    (s * (v / w).sqrt() / variance_budget).ceil() as usize
                }
                Some(_) => stats.count(),
                None => self.warmup,
            };
            let extra = target.saturating_sub(stats.count()).min(self.max_batch);
            additional.insert(index.clone(), extra);
        }
        additional
    }

    /// Frontier candidates ordered from most to least profitable
    ///
    /// Ties are broken by the smaller coordinate sum, then lexicographically.
    pub fn rank_candidates(
        &self,
        candidates: &[MultiIndex],
        profile: &IndexProfile,
        estimator: &ErrorEstimator,
        rates: &Rates,
    ) -> Vec<(MultiIndex, Prediction)> {
        let mut ranked: Vec<(MultiIndex, Prediction)> = candidates
            .iter()
            .map(|c| (c.clone(), estimator.predict(profile, c, rates)))
            .collect();
        ranked.sort_by(|(a, pa), (b, pb)| {
            pb.profit()
                .partial_cmp(&pa.profit())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.sum().cmp(&b.sum()))
                .then_with(|| a.cmp(b))
        });
        ranked
    }

    /// The single most profitable frontier candidate
    pub fn best_frontier_candidate(
        &self,
        candidates: &[MultiIndex],
        profile: &IndexProfile,
        estimator: &ErrorEstimator,
        rates: &Rates,
    ) -> Option<(MultiIndex, Prediction)> {
        self.rank_candidates(candidates, profile, estimator, rates)
            .into_iter()
            .next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(coords: &[u32]) -> MultiIndex {
        MultiIndex::new(coords.to_vec())
    }

    fn allocator() -> WorkAllocator {
        WorkAllocator::new(&Settings::default())
    }

    fn push(profile: &mut IndexProfile, index: &MultiIndex, values: &[f64], work: f64) {
        if !profile.set().contains(index) {
            profile.activate(index).unwrap();
        }
        let stats = profile.stats_mut(index).unwrap();
        for v in values {
            stats.push(&[*v], &[*v], work).unwrap();
        }
    }

    #[test]
    fn test_optimal_samples_reach_budget() {
        let mut profile = IndexProfile::new(1, 10);
        push(&mut profile, &idx(&[0]), &[0.0, 2.0], 1.0);
        push(&mut profile, &idx(&[1]), &[0.0, 1.0], 4.0);

        let budget = 0.01;
        let extra = allocator().optimal_samples(&profile, budget, &BTreeSet::new());
        let total: f64 = profile
            .iter()
            .map(|(index, stats)| stats.variance().unwrap() / (stats.count() + extra[index]) as f64)
            .sum();
        assert!(total <= budget * (1.0 + 1e-9));
        // The cheaper index gets more samples
        assert!(extra[&idx(&[0])] > extra[&idx(&[1])]);
    }

    #[test]
    fn test_optimal_samples_never_reduce_counts() {
        let mut profile = IndexProfile::new(1, 10);
        let values: Vec<f64> = (0..50).map(|i| (i % 2) as f64).collect();
        push(&mut profile, &idx(&[0]), &values, 1.0);
        let extra = allocator().optimal_samples(&profile, 1e3, &BTreeSet::new());
        assert_eq!(extra[&idx(&[0])], 0);
    }

    #[test]
    fn test_unsampled_and_skipped_indices() {
        let mut profile = IndexProfile::new(1, 10);
        push(&mut profile, &idx(&[0]), &[0.0, 2.0], 1.0);
        profile.activate(&idx(&[1])).unwrap();
        let extra = allocator().optimal_samples(&profile, 1.0, &BTreeSet::new());
        assert_eq!(extra[&idx(&[1])], 10);

        let skip: BTreeSet<MultiIndex> = [idx(&[1])].into_iter().collect();
        let extra = allocator().optimal_samples(&profile, 1.0, &skip);
        assert!(!extra.contains_key(&idx(&[1])));
    }

    #[test]
    fn test_batch_cap() {
        let mut settings = Settings::default();
        settings.sampling.max_batch = 5;
        let mut profile = IndexProfile::new(1, 10);
        push(&mut profile, &idx(&[0]), &[0.0, 2.0], 1.0);
        let extra = WorkAllocator::new(&settings).optimal_samples(&profile, 1e-8, &BTreeSet::new());
        assert_eq!(extra[&idx(&[0])], 5);
    }

    #[test]
    fn test_ties_prefer_smaller_sum_then_lexicographic() {
        let mut profile = IndexProfile::new(2, 10);
        push(&mut profile, &idx(&[0, 0]), &[1.0, 2.0], 1.0);
        let estimator = ErrorEstimator::new(&Settings {
            config: crate::routines::settings::Config {
                dimensions: 2,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        let rates = estimator.rates(&profile).unwrap();

        // Both candidates extrapolate from the zero index and have unknown error
        let candidates = vec![idx(&[1, 0]), idx(&[0, 1])];
        let ranked = allocator().rank_candidates(&candidates, &profile, &estimator, &rates);
        assert_eq!(ranked[0].0, idx(&[0, 1]));
        assert_eq!(ranked[1].0, idx(&[1, 0]));
    }

    #[test]
    fn test_best_candidate_by_profit() {
        let mut profile = IndexProfile::new(2, 10);
        push(&mut profile, &idx(&[0, 0]), &[1.0, 2.0], 1.0);
        push(&mut profile, &idx(&[1, 0]), &[0.4, 0.6], 2.0);
        push(&mut profile, &idx(&[0, 1]), &[0.01, 0.03], 2.0);
        let estimator = ErrorEstimator::new(&Settings {
            config: crate::routines::settings::Config {
                dimensions: 2,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        let rates = estimator.rates(&profile).unwrap();
        let frontier = profile.set().frontier();
        let (best, _) = allocator()
            .best_frontier_candidate(&frontier, &profile, &estimator, &rates)
            .unwrap();
        assert_eq!(best, idx(&[2, 0]));
    }
}
