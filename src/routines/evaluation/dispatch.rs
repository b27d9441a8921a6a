use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::MimcError;
use crate::routines::evaluation::{Evaluation, Evaluator};
use crate::structs::multi_index::MultiIndex;

/// A single evaluation to perform
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EvaluationRequest {
    pub index: MultiIndex,
    pub seed: u64,
}

/// The result of an [EvaluationRequest] after all attempts
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub request: EvaluationRequest,
    pub result: Result<Evaluation, MimcError>,
    pub attempts: usize,
}

/// Runs batches of evaluations on a bounded worker pool
///
/// The pool size accounts for the threads used by the solver itself, so that the total
/// number of threads stays within the available parallelism.
pub struct Dispatcher {
    pool: ThreadPool,
    max_retries: usize,
}

impl Dispatcher {
    pub fn new(threads: usize, solver_threads: usize, max_retries: usize) -> Result<Self, MimcError> {
        let workers = worker_count(threads, solver_threads);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("mimc-worker-{}", i))
            .build()
            .map_err(|e| MimcError::Configuration(format!("Unable to build thread pool: {}", e)))?;
        tracing::debug!("Evaluating samples on {} worker thread(s)", workers);
        Ok(Dispatcher { pool, max_retries })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Evaluate all requests and wait for every one of them to finish
    ///
    /// The outcomes are returned in the order of the requests. A failed request never
    /// affects the others in the batch.
    pub fn dispatch<E: Evaluator>(
        &self,
        evaluator: &E,
        requests: Vec<EvaluationRequest>,
    ) -> Vec<EvaluationOutcome> {
        self.pool.install(|| {
            requests
                .into_par_iter()
                .map(|request| self.evaluate(evaluator, request))
                .collect()
        })
    }

    fn evaluate<E: Evaluator>(&self, evaluator: &E, request: EvaluationRequest) -> EvaluationOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = evaluator
                .evaluate(&request.index, request.seed)
                .and_then(|evaluation| validate(&request, evaluation));
            match result {
                Err(error) if error.is_retryable() && attempts <= self.max_retries => {
                    tracing::debug!(
                        "Retrying evaluation at {} (attempt {}): {}",
                        request.index,
                        attempts,
                        error
                    );
                }
                result => {
                    return EvaluationOutcome {
                        request,
                        result,
                        attempts,
                    }
                }
            }
        }
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Number of workers, `threads` if set or else the available parallelism shared with the
/// solver threads
fn worker_count(threads: usize, solver_threads: usize) -> usize {
    let solver_threads = solver_threads.max(1);
    let available = available_parallelism();
    if threads > 0 {
        if oversubscribed(threads, solver_threads, available) {
            tracing::warn!(
                "{} workers with {} solver thread(s) each exceed the {} available threads",
                threads,
                solver_threads,
                available
            );
        }
        return threads;
    }
    (available / solver_threads).max(1)
}

fn oversubscribed(threads: usize, solver_threads: usize, available: usize) -> bool {
    threads.saturating_mul(solver_threads.max(1)) > available
}

fn validate(request: &EvaluationRequest, evaluation: Evaluation) -> Result<Evaluation, MimcError> {
    let failed = |reason: &str| MimcError::EvaluationFailed {
        index: request.index.clone(),
        seed: request.seed,
        reason: reason.to_string(),
    };
    if evaluation.value.is_empty() {
        return Err(failed("empty quantity of interest"));
    }
    if evaluation.value.iter().any(|v| !v.is_finite()) {
        return Err(failed("non-finite quantity of interest"));
    }
    if !evaluation.cost.is_finite() || evaluation.cost < 0.0 {
        return Err(failed("invalid cost"));
    }
    Ok(evaluation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn requests(n: u64) -> Vec<EvaluationRequest> {
        (0..n)
            .map(|seed| EvaluationRequest {
                index: MultiIndex::zero(1),
                seed,
            })
            .collect()
    }

    #[test]
    fn test_outcomes_keep_request_order() {
        let dispatcher = Dispatcher::new(4, 1, 0).unwrap();
        let evaluator = |_: &MultiIndex, seed: u64| -> Result<Evaluation, MimcError> {
            Ok(Evaluation::scalar(seed as f64, 1.0))
        };
        let outcomes = dispatcher.dispatch(&evaluator, requests(64));
        assert_eq!(outcomes.len(), 64);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.request.seed, i as u64);
            assert_eq!(outcome.result.as_ref().unwrap().value, vec![i as f64]);
        }
    }

    #[test]
    fn test_divergence_is_retried() {
        let calls = AtomicUsize::new(0);
        let evaluator = |index: &MultiIndex, seed: u64| -> Result<Evaluation, MimcError> {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(MimcError::SolverDiverged {
                    index: index.clone(),
                    seed,
                    reason: "not converged".into(),
                });
            }
            Ok(Evaluation::scalar(1.0, 1.0))
        };
        let dispatcher = Dispatcher::new(1, 1, 3).unwrap();
        let outcomes = dispatcher.dispatch(&evaluator, requests(1));
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[0].attempts, 3);
    }

    #[test]
    fn test_retries_are_bounded() {
        let evaluator = |index: &MultiIndex, seed: u64| -> Result<Evaluation, MimcError> {
            Err(MimcError::SolverDiverged {
                index: index.clone(),
                seed,
                reason: "not converged".into(),
            })
        };
        let dispatcher = Dispatcher::new(1, 1, 2).unwrap();
        let outcomes = dispatcher.dispatch(&evaluator, requests(1));
        assert!(outcomes[0].result.is_err());
        assert_eq!(outcomes[0].attempts, 3);
    }

    #[test]
    fn test_non_finite_values_fail_without_retry() {
        let evaluator = |_: &MultiIndex, _: u64| -> Result<Evaluation, MimcError> {
            Ok(Evaluation::scalar(f64::NAN, 1.0))
        };
        let dispatcher = Dispatcher::new(1, 1, 3).unwrap();
        let outcomes = dispatcher.dispatch(&evaluator, requests(2));
        for outcome in outcomes {
            assert!(matches!(
                outcome.result,
                Err(MimcError::EvaluationFailed { .. })
            ));
            assert_eq!(outcome.attempts, 1);
        }
    }

    #[test]
    fn test_worker_count_accounts_for_solver_threads() {
        assert_eq!(worker_count(3, 8), 3);
        assert!(worker_count(0, usize::MAX) >= 1);
        assert!(worker_count(0, 1) <= available_parallelism());
    }

    #[test]
    fn test_oversubscription() {
        assert!(!oversubscribed(4, 2, 8));
        assert!(oversubscribed(4, 4, 8));
        assert!(oversubscribed(2, usize::MAX, 8));
        assert!(!oversubscribed(8, 0, 8));
    }
}
