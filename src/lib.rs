//! mimcore is a framework for adaptive Multi-Index Monte Carlo (MIMC) estimation.
//!
//! MIMC estimates the expectation of a quantity of interest that can only be computed
//! approximately, at a given level of refinement in several discretization directions. The
//! estimator sums mixed differences of correlated samples over a set of multi-indices. The
//! driver in [algorithms::mimc] grows that set and the number of samples per index until
//! the estimated bias and statistical error are within the requested tolerance.
//!
//! Evaluations are provided through the [routines::evaluation::Evaluator] trait and run in
//! parallel on a bounded worker pool.
//!
//! # Example
//!
//! ```no_run
//! use mimcore::prelude::*;
//!
//! let mut settings = Settings::new();
//! settings.config.dimensions = 1;
//! settings.tolerance.target = 1e-3;
//!
//! let model = AnalyticModel::new(1.0, 1);
//! let result = fit(model, settings).unwrap();
//! println!("{} with estimate {:?}", result.status(), result.estimate());
//! std::process::exit(result.exit_code());
//! ```

/// Provides the driver and its status reporting
pub mod algorithms;
/// Entrypoints for running and resuming MIMC
pub mod entrypoints;
/// Error taxonomy
pub mod error;
/// Routines used by the driver
pub mod routines;
/// Core data structures
pub mod structs;

pub mod prelude {
    pub use crate::algorithms;
    pub use crate::algorithms::mimc::{Mimc, RunContext};
    pub use crate::algorithms::{Algorithm, Phase, Status, StopReason};
    pub use crate::entrypoints::{fit, fit_internal, resume};
    pub use crate::error::MimcError;
    pub use crate::routines::allocation::WorkAllocator;
    pub use crate::routines::estimation::budget::{Split, ToleranceBudget};
    pub use crate::routines::estimation::{ErrorEstimate, ErrorEstimator};
    pub use crate::routines::evaluation::analytic::AnalyticModel;
    pub use crate::routines::evaluation::dispatch::Dispatcher;
    pub use crate::routines::evaluation::seeds::SeedSequence;
    pub use crate::routines::evaluation::{Evaluation, Evaluator};
    pub use crate::routines::indexset::IndexSet;
    pub use crate::routines::logger;
    pub use crate::routines::output::iterations::{IterationLog, IterationRecord};
    pub use crate::routines::output::MimcResult;
    pub use crate::routines::persistence::{JsonStore, MemoryStore, Persistence, RunRecord};
    pub use crate::routines::settings::{self, Settings};
    pub use crate::routines::store::{Recorded, SampleStats, SampleStore};
    pub use crate::structs::moments::Moments;
    pub use crate::structs::multi_index::MultiIndex;
    pub use crate::structs::profile::{IndexProfile, LevelStats};
    pub use crate::structs::sample::Sample;
}
