use crate::structs::multi_index::MultiIndex;

/// Errors raised by the components of a MIMC run
///
/// Only [MimcError::Configuration], [MimcError::InadmissibleIndex] and
/// [MimcError::DimensionMismatch] abort a run. Everything else is logged with the
/// offending multi-index and the control loop continues.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MimcError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Index {index} is not admissible, missing predecessors: {missing:?}")]
    InadmissibleIndex {
        index: MultiIndex,
        missing: Vec<MultiIndex>,
    },

    #[error("Expected a multi-index of dimension {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Sample with seed {seed} at index {index} has already been recorded")]
    DuplicateSeed { index: MultiIndex, seed: u64 },

    #[error("No samples recorded at index {index}")]
    NoSamples { index: MultiIndex },

    #[error("Solver diverged at index {index} (seed {seed}): {reason}")]
    SolverDiverged {
        index: MultiIndex,
        seed: u64,
        reason: String,
    },

    #[error("Evaluation failed at index {index} (seed {seed}): {reason}")]
    EvaluationFailed {
        index: MultiIndex,
        seed: u64,
        reason: String,
    },

    #[error("Quantity of interest has {found} components, expected {expected}")]
    QoiShape { expected: usize, found: usize },

    #[error("Tolerance {tolerance} cannot be satisfied")]
    InfeasibleTolerance { tolerance: f64 },

    #[error("Decay rate in direction {direction} has been {rate:.4} for {iterations} consecutive iterations")]
    StalledConvergence {
        direction: usize,
        rate: f64,
        iterations: usize,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl MimcError {
    /// Errors that abort the run immediately
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MimcError::Configuration(_)
                | MimcError::InadmissibleIndex { .. }
                | MimcError::DimensionMismatch { .. }
        )
    }

    /// Errors for which the same evaluation may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, MimcError::SolverDiverged { .. })
    }
}

impl From<serde_json::Error> for MimcError {
    fn from(error: serde_json::Error) -> Self {
        MimcError::Persistence(error.to_string())
    }
}

impl From<std::io::Error> for MimcError {
    fn from(error: std::io::Error) -> Self {
        MimcError::Persistence(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let index = MultiIndex::new(vec![1, 0]);
        assert!(MimcError::Configuration("bad".into()).is_fatal());
        assert!(MimcError::InadmissibleIndex {
            index: index.clone(),
            missing: vec![]
        }
        .is_fatal());
        assert!(!MimcError::NoSamples {
            index: index.clone()
        }
        .is_fatal());
        assert!(!MimcError::InfeasibleTolerance { tolerance: 0.0 }.is_fatal());
    }

    #[test]
    fn test_only_divergence_is_retryable() {
        let index = MultiIndex::new(vec![2]);
        let diverged = MimcError::SolverDiverged {
            index: index.clone(),
            seed: 7,
            reason: "gmres".into(),
        };
        let failed = MimcError::EvaluationFailed {
            index,
            seed: 7,
            reason: "nan".into(),
        };
        assert!(diverged.is_retryable());
        assert!(!failed.is_retryable());
        assert!(diverged.to_string().contains("(2)"));
    }
}
