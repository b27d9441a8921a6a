use serde::{Deserialize, Serialize};

use crate::error::MimcError;
use crate::structs::multi_index::MultiIndex;

pub mod analytic;
pub mod dispatch;
pub mod seeds;

/// The value of the quantity of interest at one multi-index and seed, and its cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub value: Vec<f64>,
    pub cost: f64,
}

impl Evaluation {
    pub fn new(value: Vec<f64>, cost: f64) -> Self {
        Evaluation { value, cost }
    }

    pub fn scalar(value: f64, cost: f64) -> Self {
        Evaluation {
            value: vec![value],
            cost,
        }
    }
}

/// Computes samples of the quantity of interest
///
/// Calls with the same multi-index and seed must use the same random input, so that samples
/// at neighbouring indices are correlated. A solver that does not converge should report
/// [MimcError::SolverDiverged], which is retried.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, index: &MultiIndex, seed: u64) -> Result<Evaluation, MimcError>;
}

impl<F> Evaluator for F
where
    F: Fn(&MultiIndex, u64) -> Result<Evaluation, MimcError> + Send + Sync,
{
    fn evaluate(&self, index: &MultiIndex, seed: u64) -> Result<Evaluation, MimcError> {
        self(index, seed)
    }
}
