use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::structs::multi_index::MultiIndex;

/// One evaluation of the quantity of interest
///
/// Samples are owned by the [SampleStore](crate::routines::store::SampleStore) and never change
/// after they have been recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    index: MultiIndex,
    seed: u64,
    value: Vec<f64>,
    cost: f64,
    timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(index: MultiIndex, seed: u64, value: Vec<f64>, cost: f64) -> Self {
        Sample {
            index,
            seed,
            value,
            cost,
            timestamp: Utc::now(),
        }
    }

    pub fn index(&self) -> &MultiIndex {
        &self.index
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn value(&self) -> &[f64] {
        &self.value
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
