use std::collections::BTreeMap;

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::MimcError;
use crate::routines::settings::Settings;
use crate::structs::multi_index::MultiIndex;
use crate::structs::profile::{IndexProfile, LevelStats};

pub mod budget;
pub mod decay;

use budget::{Split, ToleranceBudget};
use decay::fit_decay_pooled;

/// A decay rate in one direction, fitted from data when possible
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rate {
    pub fitted: Option<f64>,
    pub prior: f64,
}

impl Rate {
    /// The fitted rate, or the prior if too few observations were available
    pub fn value(&self) -> f64 {
        self.fitted.unwrap_or(self.prior)
    }

    /// The rate used to extrapolate beyond the data
    ///
    /// Non-positive fits cannot describe a decaying contribution, so the prior is used instead.
    pub fn extrapolation(&self) -> f64 {
        match self.fitted {
            Some(rate) if rate > 0.0 && rate.is_finite() => rate,
            _ => self.prior,
        }
    }

    pub fn is_stalled(&self) -> bool {
        matches!(self.fitted, Some(rate) if rate <= 0.0)
    }
}

/// Weak (bias), strong (variance) and work rates in every direction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rates {
    pub weak: Vec<Rate>,
    pub strong: Vec<Rate>,
    pub work: Vec<Rate>,
}

impl Rates {
    /// Directions whose fitted weak rate is not positive
    pub fn stalled(&self) -> Vec<(usize, f64)> {
        self.weak
            .iter()
            .enumerate()
            .filter(|(_, rate)| rate.is_stalled())
            .map(|(d, rate)| (d, rate.value()))
            .collect()
    }
}

/// Extrapolated statistics of an index that has not been sampled yet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Predicted `|EΔ|`, infinite when unknown
    pub error: f64,
    /// Predicted contribution of this index and everything beyond it in the same direction
    pub tail: f64,
    pub variance: f64,
    pub work: f64,
}

impl Prediction {
    fn unknown() -> Self {
        Prediction {
            error: f64::INFINITY,
            tail: f64::INFINITY,
            variance: f64::INFINITY,
            work: f64::INFINITY,
        }
    }

    /// Error reduction per unit of statistical cost
    pub fn profit(&self) -> f64 {
        if self.error.is_infinite() {
            return f64::INFINITY;
        }
        if self.error == 0.0 {
            return 0.0;
        }
        let denominator = (self.variance * self.work).sqrt();
        if denominator == 0.0 {
            f64::INFINITY
        } else if denominator.is_finite() {
            self.error / denominator
        } else {
            0.0
        }
    }
}

/// Snapshot of the error estimates at one iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEstimate {
    pub rates: Rates,
    pub bias: f64,
    pub statistical: f64,
    pub total: f64,
    pub value: Vec<f64>,
}

impl ErrorEstimate {
    pub fn value_norm(&self) -> f64 {
        self.value.iter().map(|x| x * x).sum::<f64>().sqrt()
    }
}

/// Estimates the bias and statistical error of the MIMC estimator from an [IndexProfile]
#[derive(Debug, Clone)]
pub struct ErrorEstimator {
    weak: Vec<f64>,
    strong: Vec<f64>,
    work: Vec<f64>,
    theta: f64,
    split: Split,
    confidence_constant: f64,
}

impl ErrorEstimator {
    pub fn new(settings: &Settings) -> Result<Self, MimcError> {
        let dim = settings.config.dimensions;
        let confidence = settings.tolerance.confidence;
        let normal = Normal::new(0.0, 1.0).map_err(|e| MimcError::Configuration(e.to_string()))?;
        let confidence_constant = normal.inverse_cdf((1.0 + confidence) / 2.0);
        if !(confidence_constant.is_finite() && confidence_constant > 0.0) {
            return Err(MimcError::Configuration(format!(
                "Confidence {} does not give a finite positive quantile",
                confidence
            )));
        }

        Ok(ErrorEstimator {
            weak: settings.priors.weak(dim),
            strong: settings.priors.strong(dim),
            work: settings.priors.work(dim),
            theta: settings.tolerance.theta,
            split: settings.tolerance.split,
            confidence_constant,
        })
    }

    /// The normal quantile `C_α` for the configured confidence
    pub fn confidence_constant(&self) -> f64 {
        self.confidence_constant
    }

    pub fn priors(&self) -> (&[f64], &[f64], &[f64]) {
        (&self.weak, &self.strong, &self.work)
    }

    /// Fit the weak, strong and work rates in every direction
    ///
    /// Fails if the profile does not have one direction per prior.
    pub fn rates(&self, profile: &IndexProfile) -> Result<Rates, MimcError> {
        if profile.dim() != self.weak.len() {
            return Err(MimcError::DimensionMismatch {
                expected: self.weak.len(),
                found: profile.dim(),
            });
        }

        let fit = |d: usize, prior: f64, value: &dyn Fn(&LevelStats) -> Option<f64>, sign: f64| {
            let mut lines: BTreeMap<Vec<u32>, Vec<(u32, f64)>> = BTreeMap::new();
            for (index, stats) in profile.iter() {
                if index.get(d) == 0 || stats.count() == 0 {
                    continue;
                }
                if let Some(v) = value(stats) {
                    lines
                        .entry(index.without(d))
                        .or_default()
                        .push((index.get(d), v));
                }
            }
            let lines: Vec<Vec<(u32, f64)>> = lines.into_values().collect();
            Rate {
                fitted: fit_decay_pooled(&lines).map(|f| sign * f.slope),
                prior,
            }
        };

        let dim = profile.dim();
        Ok(Rates {
            weak: (0..dim)
                .map(|d| fit(d, self.weak[d], &|s: &LevelStats| Some(s.expectation()), -1.0))
                .collect(),
            strong: (0..dim)
                .map(|d| fit(d, self.strong[d], &|s: &LevelStats| s.variance(), -1.0))
                .collect(),
            work: (0..dim)
                .map(|d| fit(d, self.work[d], &|s: &LevelStats| s.work(), 1.0))
                .collect(),
        })
    }

    /// Extrapolate the statistics of `candidate` one step from its sampled predecessors
    ///
    /// The predecessor giving the smallest predicted error is used. A prediction from the zero
    /// index is unknown, since its statistics describe the quantity itself rather than a
    /// difference.
    pub fn predict(&self, profile: &IndexProfile, candidate: &MultiIndex, rates: &Rates) -> Prediction {
        let mut best: Option<Prediction> = None;
        for (d, predecessor) in candidate.predecessors() {
            let stats = match profile.stats(&predecessor) {
                Some(stats) if stats.count() > 0 => stats,
                _ => continue,
            };

            let weak = rates.weak[d].extrapolation();
            let strong = rates.strong[d].extrapolation();
            let work = rates.work[d].extrapolation();

            let (error, tail) = if predecessor.is_zero() {
                (f64::INFINITY, f64::INFINITY)
            } else {
                let step = (-weak).exp2();
                let error = stats.expectation() * step;
                (error, error / (1.0 - step))
            };
            let prediction = Prediction {
                error,
                tail,
                variance: stats.variance().unwrap_or(f64::INFINITY) * (-strong).exp2(),
                work: stats.work().unwrap_or(f64::INFINITY) * work.exp2(),
            };

            best = match best {
                Some(current) if current.error <= prediction.error => Some(current),
                _ => Some(prediction),
            };
        }
        best.unwrap_or_else(Prediction::unknown)
    }

    /// Estimated remaining bias, the predicted contributions summed over the boundary of the
    /// active set
    pub fn estimate_bias(&self, profile: &IndexProfile, rates: &Rates) -> f64 {
        if profile.is_empty() {
            return f64::INFINITY;
        }
        profile
            .set()
            .boundary()
            .iter()
            .map(|candidate| self.predict(profile, candidate, rates).tail)
            .sum()
    }

    /// `C_α · sqrt(Σ V/N)` over the active set, infinite while any index lacks a variance
    pub fn estimate_statistical_error(&self, profile: &IndexProfile) -> f64 {
        if profile.is_empty() {
            return f64::INFINITY;
        }
        let mut total = 0.0;
        for (_, stats) in profile.iter() {
            match stats.variance() {
                Some(variance) => total += variance / stats.count() as f64,
                None => return f64::INFINITY,
            }
        }
        self.confidence_constant * total.sqrt()
    }

    pub fn split_budget(&self, tolerance: f64, bias: f64) -> Result<ToleranceBudget, MimcError> {
        ToleranceBudget::split(
            tolerance,
            self.theta,
            self.split,
            bias,
            self.confidence_constant,
        )
    }

    pub fn estimate(&self, profile: &IndexProfile) -> Result<ErrorEstimate, MimcError> {
        let rates = self.rates(profile)?;
        let bias = self.estimate_bias(profile, &rates);
        let statistical = self.estimate_statistical_error(profile);
        Ok(ErrorEstimate {
            rates,
            bias,
            statistical,
            total: bias + statistical,
            value: profile.estimate(),
        })
    }
}
