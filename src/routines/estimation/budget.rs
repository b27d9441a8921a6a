use serde::{Deserialize, Serialize};

use crate::error::MimcError;

/// How the tolerance is divided between bias and statistical error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    /// Bias budget `θ·TOL`, statistical budget `(1-θ)·TOL`
    Fixed,
    /// Give the statistical error whatever the current bias leaves, but at least `(1-θ)·TOL`
    Adaptive,
}

/// The total tolerance split into a bias and a statistical part
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceBudget {
    pub total: f64,
    pub bias: f64,
    pub statistical: f64,
    /// Target for `Σ V/N`, i.e. `(statistical / C_α)²`
    pub variance: f64,
}

impl ToleranceBudget {
    /// Split `total` with bias fraction `theta`
    ///
    /// `confidence_constant` is the normal quantile `C_α` scaling the statistical error.
    pub fn split(
        total: f64,
        theta: f64,
        split: Split,
        bias_estimate: f64,
        confidence_constant: f64,
    ) -> Result<Self, MimcError> {
        if !(total.is_finite() && total > 0.0) {
            return Err(MimcError::InfeasibleTolerance { tolerance: total });
        }

        let statistical = match split {
            Split::Fixed => (1.0 - theta) * total,
            Split::Adaptive => {
                let remaining = if bias_estimate.is_finite() {
                    1.0 - bias_estimate / total
                } else {
                    f64::NEG_INFINITY
                };
                total * (1.0 - theta).max(remaining).min(1.0)
            }
        };
        let bias = (total - statistical).max(0.0);

        Ok(ToleranceBudget {
            total,
            bias,
            statistical,
            variance: (statistical / confidence_constant).powi(2),
        })
    }
}

/// Sequence of decreasing tolerances ending slightly below `tol`
///
/// Starts at the largest `tol·r1^k` not exceeding `max_tol` and divides by `r1` until `tol` is
/// reached, followed by `extra` tolerances `tol·r2^-i`.
pub fn tolerance_sequence(tol: f64, max_tol: f64, r1: f64, r2: f64, extra: usize) -> Vec<f64> {
    let steps = ((max_tol.ln() - tol.ln()) / r1.ln()).floor().max(0.0) as i32;
    let mut sequence: Vec<f64> = (0..=steps).rev().map(|k| tol * r1.powi(k)).collect();
    sequence.extend((1..=extra as i32).map(|i| tol * r2.powi(-i)));
    sequence
}
