use serde::{Deserialize, Serialize};

use crate::error::MimcError;

/// Running first and second moments of a vector-valued quantity
///
/// Updated one observation at a time with Welford's algorithm, componentwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    count: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl Moments {
    pub fn new() -> Self {
        Moments::default()
    }

    /// Add one observation
    ///
    /// The first observation fixes the number of components, later observations of a different
    /// length are rejected with [MimcError::QoiShape].
    pub fn push(&mut self, value: &[f64]) -> Result<(), MimcError> {
        if self.count == 0 {
            self.mean = vec![0.0; value.len()];
            self.m2 = vec![0.0; value.len()];
        } else if value.len() != self.mean.len() {
            return Err(MimcError::QoiShape {
                expected: self.mean.len(),
                found: value.len(),
            });
        }

        self.count += 1;
        let n = self.count as f64;
        for ((mean, m2), &x) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(value) {
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Unbiased componentwise variance, `None` with fewer than two observations
    pub fn variance(&self) -> Option<Vec<f64>> {
        if self.count < 2 {
            return None;
        }
        let denominator = (self.count - 1) as f64;
        Some(self.m2.iter().map(|m2| m2 / denominator).collect())
    }

    /// Euclidean norm of the mean
    pub fn mean_norm(&self) -> f64 {
        self.mean.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Sum of the componentwise variances
    pub fn variance_norm(&self) -> Option<f64> {
        self.variance().map(|v| v.iter().sum())
    }
}
