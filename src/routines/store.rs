use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MimcError;
use crate::structs::moments::Moments;
use crate::structs::multi_index::MultiIndex;
use crate::structs::sample::Sample;

/// Outcome of [SampleStore::record]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// The sample was new and has been stored
    Inserted,
    /// A sample with the same index and seed already existed and is kept
    Reused,
}

/// Aggregate statistics of a set of samples
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStats {
    pub count: usize,
    pub mean: Vec<f64>,
    /// Componentwise variance, `None` with fewer than two samples
    pub variance: Option<Vec<f64>>,
    pub total_cost: f64,
}

impl SampleStats {
    fn from_moments(moments: &Moments, total_cost: f64) -> Self {
        SampleStats {
            count: moments.count(),
            mean: moments.mean().to_vec(),
            variance: moments.variance(),
            total_cost,
        }
    }
}

/// All samples taken during a run, keyed by multi-index and seed
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStore {
    reuse: bool,
    qoi_len: Option<usize>,
    samples: BTreeMap<MultiIndex, BTreeMap<u64, Sample>>,
}

impl SampleStore {
    pub fn new(reuse: bool) -> Self {
        SampleStore {
            reuse,
            qoi_len: None,
            samples: BTreeMap::new(),
        }
    }

    /// Rebuild a store from previously recorded samples
    pub fn from_samples(reuse: bool, samples: Vec<Sample>) -> Result<Self, MimcError> {
        let mut store = SampleStore::new(reuse);
        for sample in samples {
            store.insert(sample)?;
        }
        Ok(store)
    }

    pub fn reuse(&self) -> bool {
        self.reuse
    }

    pub fn set_reuse(&mut self, reuse: bool) {
        self.reuse = reuse;
    }

    /// Record one evaluation
    ///
    /// If a sample with the same index and seed exists, the stored sample is kept when reuse is
    /// enabled and [MimcError::DuplicateSeed] is returned otherwise.
    pub fn record(
        &mut self,
        index: &MultiIndex,
        seed: u64,
        value: Vec<f64>,
        cost: f64,
    ) -> Result<Recorded, MimcError> {
        self.insert(Sample::new(index.clone(), seed, value, cost))
    }

    fn insert(&mut self, sample: Sample) -> Result<Recorded, MimcError> {
        if let Some(expected) = self.qoi_len {
            if sample.value().len() != expected {
                return Err(MimcError::QoiShape {
                    expected,
                    found: sample.value().len(),
                });
            }
        }

        let by_seed = self.samples.entry(sample.index().clone()).or_default();
        if by_seed.contains_key(&sample.seed()) {
            if self.reuse {
                return Ok(Recorded::Reused);
            }
            return Err(MimcError::DuplicateSeed {
                index: sample.index().clone(),
                seed: sample.seed(),
            });
        }

        self.qoi_len = Some(sample.value().len());
        by_seed.insert(sample.seed(), sample);
        Ok(Recorded::Inserted)
    }

    pub fn get(&self, index: &MultiIndex, seed: u64) -> Option<&Sample> {
        self.samples.get(index).and_then(|s| s.get(&seed))
    }

    pub fn contains(&self, index: &MultiIndex, seed: u64) -> bool {
        self.get(index, seed).is_some()
    }

    /// Total number of samples
    pub fn len(&self) -> usize {
        self.samples.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn indices(&self) -> impl Iterator<Item = &MultiIndex> {
        self.samples.keys()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.values().flat_map(|s| s.values())
    }

    /// Count, mean, variance and total cost of the samples at `index`
    pub fn stats(&self, index: &MultiIndex) -> Result<SampleStats, MimcError> {
        let by_seed = self
            .samples
            .get(index)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MimcError::NoSamples {
                index: index.clone(),
            })?;

        let mut moments = Moments::new();
        let mut total_cost = 0.0;
        for sample in by_seed.values() {
            moments.push(sample.value())?;
            total_cost += sample.cost();
        }
        Ok(SampleStats::from_moments(&moments, total_cost))
    }

    /// The mixed difference at `index` for one seed, together with the cost of its stencil
    ///
    /// Returns `None` unless every stencil member has a sample with this seed.
    pub fn difference(
        &self,
        index: &MultiIndex,
        mask: &[bool],
        seed: u64,
    ) -> Option<(Vec<f64>, f64)> {
        let mut delta: Vec<f64> = Vec::new();
        let mut cost = 0.0;
        for (sign, member) in index.stencil(mask) {
            let sample = self.get(&member, seed)?;
            if delta.is_empty() {
                delta = vec![0.0; sample.value().len()];
            }
            if sample.value().len() != delta.len() {
                return None;
            }
            for (d, v) in delta.iter_mut().zip(sample.value()) {
                *d += sign * v;
            }
            cost += sample.cost();
        }
        Some((delta, cost))
    }

    /// Statistics of the mixed difference at `index` in the directions set in `mask`
    ///
    /// Only seeds for which the complete stencil has been evaluated contribute. The total cost
    /// is the summed stencil cost.
    pub fn difference_stats(
        &self,
        index: &MultiIndex,
        mask: &[bool],
    ) -> Result<SampleStats, MimcError> {
        let no_samples = || MimcError::NoSamples {
            index: index.clone(),
        };
        let by_seed = self.samples.get(index).ok_or_else(no_samples)?;

        let mut moments = Moments::new();
        let mut total_cost = 0.0;
        for &seed in by_seed.keys() {
            if let Some((delta, cost)) = self.difference(index, mask, seed) {
                moments.push(&delta)?;
                total_cost += cost;
            }
        }
        if moments.count() == 0 {
            return Err(no_samples());
        }
        Ok(SampleStats::from_moments(&moments, total_cost))
    }
}

// Stored as a flat list, the keys are rebuilt on load
impl Serialize for SampleStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.samples())
    }
}

impl<'de> Deserialize<'de> for SampleStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let samples = Vec::<Sample>::deserialize(deserializer)?;
        SampleStore::from_samples(true, samples).map_err(serde::de::Error::custom)
    }
}
