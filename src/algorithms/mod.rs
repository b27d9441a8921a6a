use serde::{Deserialize, Serialize};

use crate::error::MimcError;
use crate::routines::evaluation::Evaluator;
use crate::routines::output::MimcResult;

pub mod mimc;

/// Steps of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Seeding the active set and taking warm-up samples
    Init,
    /// Estimating the bias and statistical error
    Estimating,
    /// Splitting the tolerance and deciding on new indices and samples
    Allocating,
    /// Evaluating the pending samples
    Evaluating,
    Converged,
    Failed,
    /// Stopped on a limit before reaching the tolerance
    Stopped,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Converged | Phase::Failed | Phase::Stopped)
    }
}

/// Why a run ended without converging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StopReason {
    /// The maximum number of iterations was reached
    MaxIterations,
    /// The bias budget is unmet and the active set is full
    MaxActiveSize,
    /// The cost cap does not allow any further work
    CostCap,
    /// The bias budget is unmet and no admissible index is left below the maximum level
    FrontierExhausted,
    /// The weak rate in `direction` has not been positive for too many iterations
    Stalled { direction: usize, rate: f64 },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::MaxIterations => write!(f, "maximum iterations reached"),
            StopReason::MaxActiveSize => write!(f, "maximum active set size reached"),
            StopReason::CostCap => write!(f, "cost cap reached"),
            StopReason::FrontierExhausted => write!(f, "no admissible index left"),
            StopReason::Stalled { direction, rate } => write!(
                f,
                "decay stalled in direction {} (rate {:.4})",
                direction, rate
            ),
        }
    }
}

/// Represents the status of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Status {
    /// The run is starting up
    Starting,
    /// The run is iterating
    InProgress,
    /// The estimated error is within the tolerance
    Converged,
    /// The run stopped on a limit before reaching the tolerance
    PartialConvergence(StopReason),
    /// The run failed, the estimate cannot be trusted
    Failed(StopReason),
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Starting | Status::InProgress)
    }

    /// Process exit code for the status
    ///
    /// `0` for convergence, `2` for partial convergence and `1` for failures. Runs that have
    /// not finished report `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Status::Converged => 0,
            Status::PartialConvergence(_) => 2,
            Status::Failed(_) | Status::Starting | Status::InProgress => 1,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Starting => write!(f, "Starting"),
            Status::InProgress => write!(f, "In progress"),
            Status::Converged => write!(f, "Converged"),
            Status::PartialConvergence(reason) => write!(f, "Partial convergence: {}", reason),
            Status::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// The phases of an adaptive estimator and the loop that drives them
pub trait Algorithm<E: Evaluator> {
    fn iteration(&self) -> usize;
    fn inc_iteration(&mut self) -> usize;
    fn status(&self) -> &Status;
    fn initialize(&mut self) -> Result<(), MimcError>;
    fn estimation(&mut self) -> Result<(), MimcError>;
    fn allocation(&mut self) -> Result<(), MimcError>;
    fn evaluation(&mut self) -> Result<(), MimcError>;
    fn logs(&mut self);
    fn next_cycle(&mut self) -> Result<bool, MimcError> {
        let iteration = self.inc_iteration();
        let span = tracing::info_span!("Iteration", iteration);
        let _enter = span.enter();
        self.estimation()?;
        if !self.status().is_terminal() {
            self.allocation()?;
        }
        if !self.status().is_terminal() {
            self.evaluation()?;
        }
        self.logs();
        Ok(self.status().is_terminal())
    }
    fn fit(&mut self) -> Result<MimcResult, MimcError> {
        self.initialize()?;
        while !self.next_cycle()? {}
        Ok(self.into_result())
    }
    #[allow(clippy::wrong_self_convention)]
    fn into_result(&self) -> MimcResult;
}
