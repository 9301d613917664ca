use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::snapshot::{IterationCounts, PassFail, RequestStats};
use crate::{CheckResult, IterationOutcome, MetricSnapshot, Trend};

#[derive(Debug, Default)]
struct AggregatorState {
    iterations: IterationCounts,
    iteration_duration: Trend,
    checks: BTreeMap<String, PassFail>,
    requests: BTreeMap<String, RequestStats>,
    request_totals: RequestStats,
    sealed_after: Option<Duration>,
    rejected: u64,
}

/// Accumulates iteration outcomes from every virtual user.
///
/// Each outcome is applied under a single short lock so that readers never observe half of an
/// iteration. The lock is never held across a suspension point.
#[derive(Debug)]
pub struct MetricsAggregator {
    started: Instant,
    state: Mutex<AggregatorState>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(AggregatorState::default()),
        }
    }

    /// Record the outcome of one iteration. Returns false if the aggregator has already been
    /// finalized, in which case the outcome is dropped.
    pub fn record(&self, outcome: IterationOutcome) -> bool {
        let mut state = self.state.lock();

        if state.sealed_after.is_some() {
            state.rejected += 1;
            drop(state);
            log::debug!("Dropping iteration outcome recorded after the run was finalized");
            return false;
        }

        if outcome.interrupted {
            state.iterations.interrupted += 1;
        } else {
            state.iterations.completed += 1;
            if outcome.failed {
                state.iterations.failed += 1;
            }
            state.iteration_duration.record(outcome.duration);
        }

        for check in outcome.checks {
            state.checks.entry(check.name).or_default().add(check.passed);
        }

        for operation in outcome.operations {
            let Some(elapsed) = operation.elapsed else {
                continue;
            };

            state.request_totals.outcomes.add(!operation.is_error);
            state.request_totals.duration.record(elapsed);

            let stats = state.requests.entry(operation.operation_id).or_default();
            stats.outcomes.add(!operation.is_error);
            stats.duration.record(elapsed);
        }

        true
    }

    /// Record checks made outside of any iteration, such as in the scenario's `setup`. They count
    /// towards the check totals but not towards the iteration counters.
    pub fn record_checks(&self, checks: impl IntoIterator<Item = CheckResult>) -> bool {
        let mut state = self.state.lock();

        if state.sealed_after.is_some() {
            state.rejected += 1;
            drop(state);
            log::debug!("Dropping checks recorded after the run was finalized");
            return false;
        }

        for check in checks {
            state.checks.entry(check.name).or_default().add(check.passed);
        }

        true
    }

    /// A point in time view of the metrics. The run may still be recording.
    pub fn snapshot(&self) -> MetricSnapshot {
        let state = self.state.lock();

        MetricSnapshot {
            elapsed: state
                .sealed_after
                .unwrap_or_else(|| self.started.elapsed()),
            iterations: state.iterations,
            iteration_duration: state.iteration_duration.clone(),
            checks: state.checks.clone(),
            requests: state.requests.clone(),
            request_totals: state.request_totals.clone(),
            rejected: state.rejected,
        }
    }

    /// Stop accepting outcomes and return the final view of the metrics.
    pub fn finalize(&self) -> MetricSnapshot {
        {
            let mut state = self.state.lock();
            if state.sealed_after.is_none() {
                state.sealed_after = Some(self.started.elapsed());
            }
        }

        self.snapshot()
    }

    /// Cheap view of the iteration counters, for progress reporting.
    pub fn iteration_counts(&self) -> IterationCounts {
        self.state.lock().iterations
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().sealed_after.is_some()
    }
}
