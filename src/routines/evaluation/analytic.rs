use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rand_pcg::Pcg64;

use crate::error::MimcError;
use crate::routines::evaluation::{Evaluation, Evaluator};
use crate::structs::multi_index::MultiIndex;

/// Synthetic model with known rates and expectation
///
/// For a multi-index `α` and standard normal draws `Y` determined by the seed,
///
/// `Q(α) = μ + σ Y₀ + Σ_d (b_d 2^(-w_d α_d) + τ_d 2^(-s_d α_d / 2) Y_d)`
///
/// at a cost of `Π_d 2^(γ_d α_d)`. The limit of `E[Q(α)]` is `μ`, the bias in direction `d`
/// decays with rate `w_d` and the variance of the differences with rate `s_d`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticModel {
    pub mean: f64,
    pub sigma: f64,
    pub bias: Vec<f64>,
    pub noise: Vec<f64>,
    pub weak: Vec<f64>,
    pub strong: Vec<f64>,
    pub work: Vec<f64>,
}

impl AnalyticModel {
    /// A model in `dim` directions with unit bias, weak rate 1, strong rate 2 and work rate 1
    pub fn new(mean: f64, dim: usize) -> Self {
        AnalyticModel {
            mean,
            sigma: 0.01,
            bias: vec![1.0; dim],
            noise: vec![0.01; dim],
            weak: vec![1.0; dim],
            strong: vec![2.0; dim],
            work: vec![1.0; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.bias.len()
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn with_bias(mut self, bias: Vec<f64>) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_noise(mut self, noise: Vec<f64>) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_rates(mut self, weak: Vec<f64>, strong: Vec<f64>, work: Vec<f64>) -> Self {
        self.weak = weak;
        self.strong = strong;
        self.work = work;
        self
    }

    /// The exact expectation of `Q(α)`
    pub fn expectation(&self, index: &MultiIndex) -> f64 {
        self.mean
            + (0..self.dim())
                .map(|d| self.bias[d] * (-self.weak[d] * index.get(d) as f64).exp2())
                .sum::<f64>()
    }

    pub fn cost(&self, index: &MultiIndex) -> f64 {
        (0..self.dim())
            .map(|d| (self.work[d] * index.get(d) as f64).exp2())
            .product()
    }
}

impl Evaluator for AnalyticModel {
    fn evaluate(&self, index: &MultiIndex, seed: u64) -> Result<Evaluation, MimcError> {
        if index.dim() != self.dim() {
            return Err(MimcError::DimensionMismatch {
                expected: self.dim(),
                found: index.dim(),
            });
        }

        let mut rng = Pcg64::seed_from_u64(seed);
        let y0: f64 = StandardNormal.sample(&mut rng);
        let mut value = self.mean + self.sigma * y0;
        for d in 0..self.dim() {
            let level = index.get(d) as f64;
            let y: f64 = StandardNormal.sample(&mut rng);
            value += self.bias[d] * (-self.weak[d] * level).exp2();
            value += self.noise[d] * (-self.strong[d] * level / 2.0).exp2() * y;
        }

        Ok(Evaluation::scalar(value, self.cost(index)))
    }
}
