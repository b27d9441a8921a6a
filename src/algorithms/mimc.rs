//! # Adaptive Multi-Index Monte Carlo
//!
//! The driver grows an admissible set of multi-indices and the number of samples per index
//! until the estimated error of the MIMC estimator is within the requested tolerance.
//!
//! Every iteration runs through the same phases:
//!
//! 1. **Estimating**: fit the decay rates, estimate the remaining bias and the statistical
//!    error, and check for convergence or any of the stopping conditions.
//! 2. **Allocating**: split the tolerance between bias and statistical error. While the bias
//!    is above its budget the most profitable frontier indices are activated, after which
//!    the number of samples per index is chosen to meet the variance budget at minimal cost.
//! 3. **Evaluating**: all pending evaluations are dispatched as one batch to the worker
//!    pool. Results are recorded in the sample store and folded into the profile.
//!
//! When a maximum tolerance is configured, the run works through a decreasing sequence of
//! tolerances and only the last stages are held to the target.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;

use crate::algorithms::{Algorithm, Phase, Status, StopReason};
use crate::error::MimcError;
use crate::routines::allocation::WorkAllocator;
use crate::routines::estimation::budget::ToleranceBudget;
use crate::routines::estimation::decay::complexity_rate;
use crate::routines::estimation::{ErrorEstimate, ErrorEstimator, Prediction, Rates};
use crate::routines::evaluation::dispatch::{Dispatcher, EvaluationRequest};
use crate::routines::evaluation::seeds::SeedSequence;
use crate::routines::evaluation::Evaluator;
use crate::routines::output::iterations::{IterationLog, IterationRecord};
use crate::routines::output::MimcResult;
use crate::routines::persistence::{Persistence, RunRecord};
use crate::routines::settings::Settings;
use crate::routines::store::SampleStore;
use crate::structs::multi_index::MultiIndex;
use crate::structs::profile::IndexProfile;

/// The state owned by a single run
///
/// Everything that changes while the run progresses lives here, so that independent runs
/// never share any mutable state.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub profile: IndexProfile,
    pub store: SampleStore,
    /// Cost of every evaluation performed by this run
    pub total_cost: f64,
}

impl RunContext {
    pub fn new(settings: &Settings) -> Self {
        RunContext {
            profile: IndexProfile::new(
                settings.config.dimensions,
                settings.indexset.max_level,
            ),
            store: SampleStore::new(settings.sampling.reuse),
            total_cost: 0.0,
        }
    }
}

/// Adaptive MIMC driver
pub struct Mimc<E: Evaluator> {
    evaluator: E,
    settings: Settings,
    estimator: ErrorEstimator,
    allocator: WorkAllocator,
    dispatcher: Dispatcher,
    seeds: SeedSequence,
    context: RunContext,
    persistence: Option<Box<dyn Persistence>>,
    /// Tolerances to work through, the last ones at or below the target
    tolerances: Vec<f64>,
    /// Position in `tolerances`
    stage: usize,
    iteration: usize,
    phase: Phase,
    status: Status,
    /// Consecutive iterations with a non-positive weak rate, per direction
    stall_counts: Vec<usize>,
    /// Additional difference samples to take per index in the next evaluation
    pending: BTreeMap<MultiIndex, usize>,
    /// Indices with failed samples in the last evaluation
    degraded: BTreeSet<MultiIndex>,
    estimate: Option<ErrorEstimate>,
    budget: Option<ToleranceBudget>,
    iteration_log: IterationLog,
    /// Difference samples completed in the last evaluation
    new_samples: usize,
}

impl<E: Evaluator> Mimc<E> {
    pub fn new(settings: Settings, evaluator: E) -> Result<Self, MimcError> {
        settings.validate()?;
        let estimator = ErrorEstimator::new(&settings)?;
        let allocator = WorkAllocator::new(&settings);
        let dispatcher = Dispatcher::new(
            settings.sampling.threads,
            settings.sampling.solver_threads,
            settings.sampling.max_retries,
        )?;
        let tolerances = settings.tolerance.sequence();
        tracing::debug!("Tolerance sequence: {:?}", tolerances);

        Ok(Mimc {
            evaluator,
            estimator,
            allocator,
            dispatcher,
            seeds: SeedSequence::new(settings.config.seed),
            context: RunContext::new(&settings),
            persistence: None,
            tolerances,
            stage: 0,
            iteration: 0,
            phase: Phase::Init,
            status: Status::Starting,
            stall_counts: vec![0; settings.config.dimensions],
            pending: BTreeMap::new(),
            degraded: BTreeSet::new(),
            estimate: None,
            budget: None,
            iteration_log: IterationLog::new(),
            new_samples: 0,
            settings,
        })
    }

    /// Save a checkpoint after every evaluation phase
    pub fn with_persistence(mut self, persistence: Box<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Continue a run from a checkpoint
    ///
    /// The sample store follows the reuse policy of `settings`, so that a resumed run may
    /// change it.
    pub fn resume(settings: Settings, evaluator: E, record: RunRecord) -> Result<Self, MimcError> {
        let mut mimc = Mimc::new(settings, evaluator)?;
        let expected = mimc.settings.config.dimensions;
        if record.profile.dim() != expected {
            return Err(MimcError::DimensionMismatch {
                expected,
                found: record.profile.dim(),
            });
        }

        let parameters = mimc.settings.tagged_parameters();
        for (name, value) in &record.parameters {
            match parameters.get(name) {
                Some(current) if current == value => {}
                current => tracing::warn!(
                    "Parameter {} changed since the checkpoint: {} -> {:?}",
                    name,
                    value,
                    current
                ),
            }
        }

        let mut store = record.samples;
        store.set_reuse(mimc.settings.sampling.reuse);
        mimc.context = RunContext {
            profile: record.profile,
            store,
            total_cost: record.total_cost,
        };
        mimc.iteration = record.iteration;
        mimc.stage = record.stage.min(mimc.tolerances.len() - 1);
        tracing::info!(
            "Resuming run '{}' at iteration {} with {} active indices",
            record.tag,
            record.iteration,
            mimc.context.profile.len()
        );
        Ok(mimc)
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Tolerance of the current stage
    pub fn tolerance(&self) -> f64 {
        self.tolerances[self.stage]
    }

    pub fn error_estimate(&self) -> Option<&ErrorEstimate> {
        self.estimate.as_ref()
    }

    pub fn budget(&self) -> Option<&ToleranceBudget> {
        self.budget.as_ref()
    }

    pub fn iteration_log(&self) -> &IterationLog {
        &self.iteration_log
    }

    /// A checkpoint of the current state
    pub fn run_record(&self) -> RunRecord {
        RunRecord {
            tag: self.settings.checkpoint.tag.clone(),
            parameters: self.settings.tagged_parameters(),
            iteration: self.iteration,
            stage: self.stage,
            total_cost: self.context.total_cost,
            profile: self.context.profile.clone(),
            samples: self.context.store.clone(),
            saved: Utc::now(),
        }
    }

    fn finish(&mut self, status: Status) {
        self.phase = match status {
            Status::Converged => Phase::Converged,
            Status::Failed(_) => Phase::Failed,
            _ => Phase::Stopped,
        };
        match &status {
            Status::Converged => tracing::info!("The run converged"),
            Status::PartialConvergence(reason) => {
                tracing::warn!("Stopping before convergence: {}", reason)
            }
            Status::Failed(reason) => tracing::error!("The run failed: {}", reason),
            _ => {}
        }
        self.status = status;
        self.checkpoint();
    }

    fn remaining_cost(&self) -> f64 {
        match self.settings.termination.max_cost {
            Some(max_cost) => (max_cost - self.context.total_cost).max(0.0),
            None => f64::INFINITY,
        }
    }

    /// Cost of one difference sample at `index`, extrapolated for indices without samples
    fn sample_cost(&self, index: &MultiIndex, rates: &Rates) -> f64 {
        self.context
            .profile
            .stats(index)
            .and_then(|stats| stats.work())
            .unwrap_or_else(|| {
                self.estimator
                    .predict(&self.context.profile, index, rates)
                    .work
            })
    }

    /// Update the stall counters and fail if any direction stalled for too long
    fn check_stalled(&mut self, rates: &Rates) -> bool {
        let stalled = rates.stalled();
        for (d, count) in self.stall_counts.iter_mut().enumerate() {
            if stalled.iter().any(|(direction, _)| *direction == d) {
                *count += 1;
            } else {
                *count = 0;
            }
        }

        let limit = self.settings.termination.stall_iterations;
        for (direction, rate) in stalled {
            if self.stall_counts[direction] > limit {
                let error = MimcError::StalledConvergence {
                    direction,
                    rate,
                    iterations: self.stall_counts[direction],
                };
                tracing::error!("{}", error);
                self.finish(Status::Failed(StopReason::Stalled { direction, rate }));
                return true;
            }
            tracing::warn!(
                "Weak rate in direction {} is {:.4}, using the prior for extrapolation",
                direction,
                rate
            );
        }
        false
    }

    /// Advance through the tolerance sequence and check for convergence
    fn check_tolerance(&mut self, total: f64) {
        let target = self.settings.tolerance.target;
        let enough_indices = self.context.profile.len() >= self.settings.indexset.min_active;
        let mut advanced = false;
        loop {
            let tolerance = self.tolerances[self.stage];
            let last = self.stage + 1 == self.tolerances.len();
            if tolerance <= target {
                if total <= target && enough_indices {
                    self.finish(Status::Converged);
                } else if !last && !advanced {
                    self.stage += 1;
                    tracing::debug!(
                        "Tightening the tolerance to {:.4e}",
                        self.tolerances[self.stage]
                    );
                }
                return;
            }
            if total <= tolerance.max(target) && !last {
                self.stage += 1;
                advanced = true;
                tracing::info!(
                    "Tolerance {:.4e} reached, continuing with {:.4e}",
                    tolerance,
                    self.tolerances[self.stage]
                );
                continue;
            }
            return;
        }
    }

    /// Activate the most profitable frontier indices that fit in the remaining cost
    ///
    /// Returns the reason the bias cannot be reduced if nothing could be activated.
    fn expand(
        &mut self,
        rates: &Rates,
        remaining: &mut f64,
    ) -> Result<Option<StopReason>, MimcError> {
        let profile = &self.context.profile;
        let frontier = profile.set().frontier();
        if frontier.is_empty() {
            return Ok(Some(StopReason::FrontierExhausted));
        }
        if profile.len() >= self.settings.indexset.max_active {
            return Ok(Some(StopReason::MaxActiveSize));
        }

        let candidates: Vec<MultiIndex> = frontier
            .into_iter()
            .filter(|candidate| {
                candidate
                    .predecessors()
                    .all(|(_, p)| !profile.set().contains(&p) || profile.is_sampled(&p))
            })
            .collect();
        let ranked: Vec<(MultiIndex, Prediction)> =
            self.allocator
                .rank_candidates(&candidates, profile, &self.estimator, rates);

        let warmup = self.allocator.warmup();
        let mut added = 0;
        let mut unaffordable = false;
        for (candidate, prediction) in ranked {
            if added >= self.settings.indexset.max_add
                || self.context.profile.len() >= self.settings.indexset.max_active
            {
                break;
            }
            let cost = warmup as f64 * prediction.work;
            if cost.is_finite() && cost > *remaining {
                tracing::debug!(
                    "Warm-up of {} ({:.4e}) exceeds the remaining cost",
                    candidate,
                    cost
                );
                unaffordable = true;
                continue;
            }
            if cost.is_finite() {
                *remaining -= cost;
            }
            tracing::info!(
                "Activating {} (predicted |EΔ| {:.4e}, profit {:.4e})",
                candidate,
                prediction.error,
                prediction.profit()
            );
            self.context.profile.activate(&candidate)?;
            self.pending.insert(candidate, warmup);
            added += 1;
        }

        if added == 0 && unaffordable {
            return Ok(Some(StopReason::CostCap));
        }
        Ok(None)
    }

    fn checkpoint(&mut self) {
        if self.persistence.is_none() {
            return;
        }
        let record = self.run_record();
        if let Some(persistence) = self.persistence.as_mut() {
            if let Err(error) = persistence.save(&record) {
                tracing::warn!("Unable to save checkpoint: {}", error);
            }
        }
    }
}

impl<E: Evaluator> Algorithm<E> for Mimc<E> {
    fn iteration(&self) -> usize {
        self.iteration
    }

    fn inc_iteration(&mut self) -> usize {
        self.iteration += 1;
        self.iteration
    }

    fn status(&self) -> &Status {
        &self.status
    }

    fn initialize(&mut self) -> Result<(), MimcError> {
        self.phase = Phase::Init;
        let dim = self.settings.config.dimensions;

        if self.context.profile.is_empty() {
            self.context.profile.activate(&MultiIndex::zero(dim))?;
            for index in self.settings.indexset.fixed_indices() {
                tracing::info!("Fixing index {}", index);
                self.context.profile.fix(&index)?;
            }
        }

        let (weak, strong, work) = self.estimator.priors();
        match complexity_rate(weak, strong, work) {
            (rate, Some(log_rate)) => tracing::info!(
                "Expected work: TOL^{:.2} · log(1/TOL)^{:.2}",
                rate,
                log_rate
            ),
            (rate, None) => tracing::info!("Expected work: TOL^{:.2}", rate),
        }

        let warmup = self.allocator.warmup();
        for (index, stats) in self.context.profile.iter() {
            if stats.count() < 2 {
                self.pending
                    .insert(index.clone(), warmup.saturating_sub(stats.count()));
            }
        }

        self.status = Status::InProgress;
        self.evaluation()
    }

    fn estimation(&mut self) -> Result<(), MimcError> {
        self.phase = Phase::Estimating;
        self.new_samples = 0;
        let estimate = self.estimator.estimate(&self.context.profile)?;

        if !self.check_stalled(&estimate.rates) {
            self.check_tolerance(estimate.total);
        }

        if !self.status.is_terminal() {
            if self.iteration >= self.settings.config.max_iterations {
                self.finish(Status::PartialConvergence(StopReason::MaxIterations));
            } else if self.remaining_cost() <= 0.0 {
                self.finish(Status::PartialConvergence(StopReason::CostCap));
            }
        }

        self.estimate = Some(estimate);
        Ok(())
    }

    fn allocation(&mut self) -> Result<(), MimcError> {
        self.phase = Phase::Allocating;
        let estimate = match self.estimate.take() {
            Some(estimate) => estimate,
            None => self.estimator.estimate(&self.context.profile)?,
        };
        let tolerance = self.tolerance();
        let budget = self.estimator.split_budget(tolerance, estimate.bias)?;
        tracing::debug!(
            "Budget: bias {:.4e}, statistical {:.4e}",
            budget.bias,
            budget.statistical
        );

        let mut affordable = self.remaining_cost();
        let need_bias = estimate.bias > budget.bias
            || self.context.profile.len() < self.settings.indexset.min_active;
        if need_bias {
            if let Some(reason) = self.expand(&estimate.rates, &mut affordable)? {
                let error = MimcError::InfeasibleTolerance { tolerance };
                tracing::warn!("{} with the bias at {:.4e}", error, estimate.bias);
                self.estimate = Some(estimate);
                self.budget = Some(budget);
                self.finish(Status::PartialConvergence(reason));
                return Ok(());
            }
        }

        let optimal =
            self.allocator
                .optimal_samples(&self.context.profile, budget.variance, &self.degraded);
        for (index, extra) in optimal {
            let entry = self.pending.entry(index).or_insert(0);
            *entry = (*entry).max(extra);
        }
        for index in &self.degraded {
            tracing::debug!("Skipping degraded index {}", index);
        }

        if self.settings.termination.max_cost.is_some() {
            let remaining = self.remaining_cost();
            let projected: f64 = self
                .pending
                .iter()
                .map(|(index, n)| (*n as f64) * self.sample_cost(index, &estimate.rates))
                .filter(|cost| cost.is_finite())
                .sum();
            if projected > remaining {
                let scale = if projected > 0.0 {
                    remaining / projected
                } else {
                    0.0
                };
                tracing::warn!(
                    "Projected cost {:.4e} exceeds the remaining {:.4e}, scaling by {:.3}",
                    projected,
                    remaining,
                    scale
                );
                for n in self.pending.values_mut() {
                    *n = (*n as f64 * scale).floor() as usize;
                }
                if self.pending.values().all(|n| *n == 0) {
                    self.pending.clear();
                    self.estimate = Some(estimate);
                    self.budget = Some(budget);
                    self.finish(Status::PartialConvergence(StopReason::CostCap));
                    return Ok(());
                }
            }
        }

        for (index, n) in self.pending.iter().filter(|(_, n)| **n > 0) {
            tracing::debug!("Allocating {} samples to {}", n, index);
        }

        self.estimate = Some(estimate);
        self.budget = Some(budget);
        self.phase = Phase::Evaluating;
        Ok(())
    }

    fn evaluation(&mut self) -> Result<(), MimcError> {
        self.phase = Phase::Evaluating;
        self.degraded.clear();
        let reuse = self.context.store.reuse();
        let dim = self.settings.config.dimensions;
        let pending = std::mem::take(&mut self.pending);

        // Seeds per index, and the index each evaluation is charged to
        let mut batches: Vec<(MultiIndex, Vec<u64>)> = Vec::new();
        let mut owners: BTreeMap<EvaluationRequest, MultiIndex> = BTreeMap::new();
        for (index, n) in pending {
            if n == 0 {
                continue;
            }
            let seeds = &self.seeds;
            let drawn = match self.context.profile.stats_mut(&index) {
                Some(stats) => stats.reserve(n, |k| seeds.seed(&index, k)),
                None => continue,
            };
            for &seed in &drawn {
                for (_, member) in index.full_stencil() {
                    if reuse && self.context.store.contains(&member, seed) {
                        continue;
                    }
                    owners
                        .entry(EvaluationRequest {
                            index: member,
                            seed,
                        })
                        .or_insert_with(|| index.clone());
                }
            }
            batches.push((index, drawn));
        }

        let requests: Vec<EvaluationRequest> = owners.keys().cloned().collect();
        if !requests.is_empty() {
            tracing::debug!(
                "Dispatching {} evaluations to {} workers",
                requests.len(),
                self.dispatcher.workers()
            );
        }
        let outcomes = self.dispatcher.dispatch(&self.evaluator, requests);

        let mut failures = 0;
        for outcome in outcomes {
            let request = outcome.request;
            let evaluation = match outcome.result {
                Ok(evaluation) => evaluation,
                Err(error) => {
                    failures += 1;
                    tracing::warn!("Giving up after {} attempt(s): {}", outcome.attempts, error);
                    continue;
                }
            };
            let cost = evaluation.cost;
            match self
                .context
                .store
                .record(&request.index, request.seed, evaluation.value, cost)
            {
                Ok(_) => {
                    self.context.total_cost += cost;
                    if let Some(stats) = owners
                        .get(&request)
                        .and_then(|owner| self.context.profile.stats_mut(owner))
                    {
                        stats.add_spent(cost);
                    }
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    failures += 1;
                    tracing::warn!("Discarding evaluation at {}: {}", request.index, error);
                }
            }
        }

        let mask = vec![true; dim];
        for (index, seeds) in batches {
            for seed in seeds {
                let difference = self.context.store.difference(&index, &mask, seed);
                let fine = self
                    .context
                    .store
                    .get(&index, seed)
                    .map(|sample| sample.value().to_vec());
                let stats = match self.context.profile.stats_mut(&index) {
                    Some(stats) => stats,
                    None => continue,
                };
                match (difference, fine) {
                    (Some((delta, work)), Some(fine)) => {
                        stats.push(&delta, &fine, work)?;
                        self.new_samples += 1;
                    }
                    _ => {
                        self.degraded.insert(index.clone());
                        if reuse {
                            stats.defer(seed);
                        }
                    }
                }
            }
        }

        if failures > 0 {
            tracing::warn!(
                "{} evaluation(s) failed, degraded indices: {:?}",
                failures,
                self.degraded
                    .iter()
                    .map(|index| index.to_string())
                    .collect::<Vec<_>>()
            );
        }

        self.checkpoint();
        self.phase = Phase::Estimating;
        Ok(())
    }

    fn logs(&mut self) {
        let (bias, statistical, total, value) = match &self.estimate {
            Some(estimate) => (
                estimate.bias,
                estimate.statistical,
                estimate.total,
                estimate.value_norm(),
            ),
            None => (f64::INFINITY, f64::INFINITY, f64::INFINITY, f64::NAN),
        };
        let profile = &self.context.profile;

        tracing::info!(
            "Bias = {:.4e}, statistical error = {:.4e}, total = {:.4e} (tolerance {:.4e})",
            bias,
            statistical,
            total,
            self.tolerance()
        );
        tracing::info!(
            "Active indices: {}, samples: {}, total cost: {:.4e}",
            profile.len(),
            profile.total_samples(),
            self.context.total_cost
        );
        for (index, stats) in profile.iter() {
            tracing::debug!(
                "{:>12} N = {:>8} E = {:.4e} V = {:.4e} W = {:.4e}",
                index.to_string(),
                stats.count(),
                stats.expectation(),
                stats.variance().unwrap_or(f64::NAN),
                stats.work().unwrap_or(f64::NAN)
            );
        }

        let record = IterationRecord {
            iteration: self.iteration,
            tolerance: self.tolerance(),
            status: self.status.clone(),
            active: profile.len(),
            frontier: profile.set().frontier().len(),
            bias,
            statistical,
            total,
            estimate: value,
            total_cost: self.context.total_cost,
            new_samples: self.new_samples,
            degraded: self.degraded.len(),
        };
        self.iteration_log.push(record);
    }

    fn into_result(&self) -> MimcResult {
        MimcResult::new(
            self.status.clone(),
            self.context.profile.estimate(),
            self.estimate.clone(),
            self.context.profile.clone(),
            self.iteration,
            self.context.total_cost,
            self.context.store.len(),
            self.settings.clone(),
            self.iteration_log.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::routines::evaluation::analytic::AnalyticModel;
    use crate::routines::evaluation::Evaluation;
    use crate::routines::persistence::MemoryStore;

    fn settings(dim: usize) -> Settings {
        let mut settings = Settings::default();
        settings.config.dimensions = dim;
        settings.sampling.threads = 2;
        settings.log.write = false;
        settings.output.write = false;
        settings
    }

    #[test]
    fn test_initialize_takes_warmup_samples() {
        let mut mimc = Mimc::new(settings(2), AnalyticModel::new(1.0, 2)).unwrap();
        mimc.initialize().unwrap();

        let zero = MultiIndex::zero(2);
        let stats = mimc.context().profile.stats(&zero).unwrap();
        assert_eq!(stats.count(), 10);
        assert_eq!(mimc.context().store.len(), 10);
        assert_eq!(mimc.status(), &Status::InProgress);
        assert_eq!(mimc.phase(), Phase::Estimating);
        // Cost of the zero index is one per evaluation
        assert!((mimc.context().total_cost - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_indices_are_activated() {
        let mut settings = settings(2);
        settings.indexset.fixed = vec![vec![2, 0]];
        let mut mimc = Mimc::new(settings, AnalyticModel::new(1.0, 2)).unwrap();
        mimc.initialize().unwrap();

        let fixed = MultiIndex::new(vec![2, 0]);
        let stats = mimc.context().profile.stats(&fixed).unwrap();
        assert!(stats.is_fixed());
        assert_eq!(stats.count(), 10);
        // The stencil of (2, 0) needs (1, 0) as well
        let seed = mimc.seeds.seed(&fixed, 0);
        assert!(mimc
            .context()
            .store
            .contains(&MultiIndex::new(vec![1, 0]), seed));
    }

    #[test]
    fn test_first_cycle_activates_a_frontier_index() {
        let mut mimc = Mimc::new(settings(1), AnalyticModel::new(1.0, 1)).unwrap();
        mimc.initialize().unwrap();
        assert!(!mimc.next_cycle().unwrap());

        // The bias is unknown until the first difference has been sampled
        assert!(mimc.error_estimate().unwrap().bias.is_infinite());
        let one = MultiIndex::new(vec![1]);
        assert_eq!(mimc.context().profile.stats(&one).unwrap().count(), 10);
        assert_eq!(mimc.iteration_log().len(), 1);
    }

    #[test]
    fn test_reuse_shares_stencil_evaluations() {
        let mut mimc = Mimc::new(settings(1), AnalyticModel::new(1.0, 1)).unwrap();
        mimc.initialize().unwrap();
        mimc.next_cycle().unwrap();

        // Every seed at (1) evaluates (1) and (0), with seeds distinct from the zero index
        let zero = MultiIndex::zero(1);
        let one = MultiIndex::new(vec![1]);
        let zero_count = mimc.context().profile.stats(&zero).unwrap().count();
        assert_eq!(mimc.context().store.len(), zero_count + 20);
        let stats = mimc.context().profile.stats(&one).unwrap();
        assert!((stats.work().unwrap() - 3.0).abs() < 1e-12);
        assert!((stats.spent() - 30.0).abs() < 1e-12);
    }

    /// Fails the first attempt of every seed at level one
    struct FailsOnce {
        model: AnalyticModel,
        attempted: Mutex<BTreeSet<u64>>,
    }

    impl Evaluator for FailsOnce {
        fn evaluate(&self, index: &MultiIndex, seed: u64) -> Result<Evaluation, MimcError> {
            if index.get(0) == 1 && self.attempted.lock().unwrap().insert(seed) {
                return Err(MimcError::EvaluationFailed {
                    index: index.clone(),
                    seed,
                    reason: "unsupported".to_string(),
                });
            }
            self.model.evaluate(index, seed)
        }
    }

    #[test]
    fn test_degraded_index_is_skipped_for_one_iteration() {
        let evaluator = FailsOnce {
            model: AnalyticModel::new(1.0, 1),
            attempted: Mutex::new(BTreeSet::new()),
        };
        let mut mimc = Mimc::new(settings(1), evaluator).unwrap();
        mimc.initialize().unwrap();
        assert!(!mimc.next_cycle().unwrap());

        // Every warm-up sample at (1) failed and its seed was kept
        let one = MultiIndex::new(vec![1]);
        let stats = mimc.context().profile.stats(&one).unwrap();
        assert_eq!(stats.count(), 0);
        let deferred = stats.pending_retries().to_vec();
        assert_eq!(deferred.len(), 10);
        assert!(mimc.degraded.contains(&one));
        assert_eq!(mimc.iteration_log().last().unwrap().degraded, 1);

        // The next allocation leaves the degraded index out
        mimc.inc_iteration();
        mimc.estimation().unwrap();
        mimc.allocation().unwrap();
        assert_eq!(mimc.pending.get(&one).copied().unwrap_or(0), 0);
        mimc.evaluation().unwrap();
        mimc.logs();
        let stats = mimc.context().profile.stats(&one).unwrap();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.pending_retries(), deferred.as_slice());
        assert!(mimc.degraded.is_empty());

        // The iteration after that samples the kept seeds again
        assert!(!mimc.next_cycle().unwrap());
        let stats = mimc.context().profile.stats(&one).unwrap();
        assert_eq!(stats.count(), 10);
        assert!(stats.pending_retries().is_empty());
        for seed in &deferred {
            assert!(mimc.context().store.contains(&one, *seed));
        }
        assert!(mimc.degraded.is_empty());
    }

    #[test]
    fn test_checkpoint_after_evaluation() {
        let store = MemoryStore::new();
        let mut mimc = Mimc::new(settings(1), AnalyticModel::new(1.0, 1))
            .unwrap()
            .with_persistence(Box::new(store.clone()));
        mimc.initialize().unwrap();

        let record = store.load("mimc").unwrap();
        assert_eq!(record.profile, mimc.context().profile);
        assert_eq!(record.samples.len(), 10);
    }

    #[test]
    fn test_checkpoint_when_the_run_stops() {
        let mut settings = settings(1);
        settings.config.max_iterations = 2;
        let store = MemoryStore::new();
        let mut mimc = Mimc::new(settings, AnalyticModel::new(1.0, 1))
            .unwrap()
            .with_persistence(Box::new(store.clone()));
        let result = mimc.fit().unwrap();
        assert_eq!(
            result.status(),
            &Status::PartialConvergence(StopReason::MaxIterations)
        );

        // The second iteration stops before evaluating, yet the checkpoint records it
        let record = store.load("mimc").unwrap();
        assert_eq!(record.iteration, 2);
        assert_eq!(record.profile, mimc.context().profile);
        assert_eq!(record.samples.len(), mimc.context().store.len());
    }

    #[test]
    fn test_resume_rejects_other_dimensions() {
        let mimc = Mimc::new(settings(2), AnalyticModel::new(1.0, 2)).unwrap();
        let record = mimc.run_record();
        let resumed = Mimc::resume(settings(1), AnalyticModel::new(1.0, 1), record);
        assert!(matches!(
            resumed,
            Err(MimcError::DimensionMismatch {
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn test_stall_counter_fails_the_run() {
        let mut settings = settings(1);
        settings.termination.stall_iterations = 0;
        let mut mimc = Mimc::new(settings, AnalyticModel::new(1.0, 1)).unwrap();
        let rates = Rates {
            weak: vec![crate::routines::estimation::Rate {
                fitted: Some(-0.5),
                prior: 1.0,
            }],
            strong: Vec::new(),
            work: Vec::new(),
        };
        assert!(mimc.check_stalled(&rates));
        assert_eq!(
            mimc.status(),
            &Status::Failed(StopReason::Stalled {
                direction: 0,
                rate: -0.5
            })
        );
        assert_eq!(mimc.phase(), Phase::Failed);
    }

    #[test]
    fn test_tolerance_stages_advance() {
        let mut settings = settings(1);
        settings.tolerance.target = 1e-2;
        settings.tolerance.max = Some(1e-1);
        settings.tolerance.r1 = 2.0;
        let mut mimc = Mimc::new(settings, AnalyticModel::new(1.0, 1)).unwrap();
        assert!((mimc.tolerance() - 8e-2).abs() < 1e-12);
        mimc.context.profile.activate(&MultiIndex::zero(1)).unwrap();

        // Satisfies every stage above the target, but not the target itself
        mimc.check_tolerance(1.5e-2);
        assert!((mimc.tolerance() - 1e-2).abs() < 1e-12);
        assert_eq!(mimc.status(), &Status::Starting);

        mimc.check_tolerance(5e-3);
        assert_eq!(mimc.status(), &Status::Converged);
    }

    #[test]
    fn test_empty_profile_never_converges() {
        let mut mimc = Mimc::new(settings(1), AnalyticModel::new(1.0, 1)).unwrap();
        mimc.check_tolerance(0.0);
        assert_eq!(mimc.status(), &Status::Starting);
    }
}
