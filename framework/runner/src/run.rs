use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;
use surge_instruments::{
    evaluate_thresholds, MetricSnapshot, MetricsAggregator, SummaryReport, ThresholdReport,
    Verdict, VuSummary,
};
use surge_summary_model::{append_run_summary, RunSummary, StageSummary};

use crate::controller::{RampController, RampEnd};
use crate::definition::{Scenario, ScenarioDefinition, ScenarioDefinitionBuilder};
use crate::iteration::catch_hook;
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::ramp::RunBound;
use crate::scheduler::{Scheduler, SchedulerStats, VuStats};
use crate::shutdown::start_shutdown_listener;
use crate::{context::RunnerContext, executor::Executor};

/// Process exit code for a run whose thresholds were breached or inconclusive.
pub const EXIT_THRESHOLDS_FAILED: i32 = 99;
/// Process exit code for a run whose setup failed.
pub const EXIT_SETUP_FAILED: i32 = 107;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
pub enum RunState {
    #[display("idle")]
    Idle,
    #[display("setting up")]
    SettingUp,
    #[display("ramping")]
    Ramping,
    #[display("draining")]
    Draining,
    #[display("evaluating")]
    Evaluating,
    #[display("done")]
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub state: RunState,
    /// Time since the run started.
    pub at: Duration,
}

/// Failure counts by kind, reported with every completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub iterations_failed: u64,
    pub iterations_interrupted: u64,
    pub checks_failed: u64,
    pub requests_failed: u64,
    pub thresholds_breached: usize,
    pub thresholds_inconclusive: usize,
    pub vus_bailed: usize,
    pub vu_setup_failures: usize,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub snapshot: MetricSnapshot,
    pub threshold_report: ThresholdReport,
    pub overall_passed: bool,
    /// The run was stopped before its profile completed.
    pub cancelled: bool,
    pub failures: FailureCounts,
    pub vus: VuStats,
    pub state_history: Vec<StateTransition>,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunResult),
    SetupFailed {
        error: anyhow::Error,
        state_history: Vec<StateTransition>,
    },
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, RunOutcome::Completed(result) if result.overall_passed)
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed(result) if result.overall_passed => 0,
            RunOutcome::Completed(_) => EXIT_THRESHOLDS_FAILED,
            RunOutcome::SetupFailed { .. } => EXIT_SETUP_FAILED,
        }
    }

    pub fn result(&self) -> Option<&RunResult> {
        match self {
            RunOutcome::Completed(result) => Some(result),
            RunOutcome::SetupFailed { .. } => None,
        }
    }

    pub fn state_history(&self) -> &[StateTransition] {
        match self {
            RunOutcome::Completed(result) => &result.state_history,
            RunOutcome::SetupFailed { state_history, .. } => state_history,
        }
    }
}

struct StateTracker {
    started: Instant,
    history: Vec<StateTransition>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            history: vec![StateTransition {
                state: RunState::Idle,
                at: Duration::ZERO,
            }],
        }
    }

    fn transition(&mut self, state: RunState) {
        let at = self.started.elapsed();
        log::info!("Run is {} ({:.1}s)", state, at.as_secs_f64());
        self.history.push(StateTransition { state, at });
    }
}

/// Run a scenario from start to finish.
///
/// Returns an error only for problems with the configuration or the runner itself. A failing
/// setup hook, failing iterations and breached thresholds are all reported through the
/// [RunOutcome].
pub fn run<S: Scenario>(definition: ScenarioDefinitionBuilder<S>) -> anyhow::Result<RunOutcome> {
    let definition = definition.build()?;
    let plan = &definition.plan;

    log::info!("Running scenario: {}", definition.name);

    let run_id = definition
        .run_id
        .clone()
        .unwrap_or_else(|| nanoid::nanoid!());
    let started_at = chrono::Utc::now().timestamp();
    let mut states = StateTracker::new();

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let signals = start_shutdown_listener(&runtime);
    let executor = Arc::new(Executor::new(runtime, signals.abort.clone()));
    let vu_stats = Arc::new(SchedulerStats::default());
    let aggregator = Arc::new(MetricsAggregator::new());
    let mut runner_context = RunnerContext::new(
        executor.clone(),
        signals.cancel.clone(),
        vu_stats.clone(),
        aggregator.clone(),
        plan.target_url.clone(),
        run_id.clone(),
    );

    states.transition(RunState::SettingUp);
    if let Err(error) = catch_hook(|| definition.scenario.setup(&mut runner_context)) {
        log::error!("Setup failed, no iterations will be run: {:?}", error);
        states.transition(RunState::Done);

        let mut summary = new_run_summary(&definition, &run_id, started_at);
        summary.setup_failed = true;
        write_run_summary(&definition, summary);

        return Ok(RunOutcome::SetupFailed {
            error,
            state_history: states.history,
        });
    }

    let runner_context = Arc::new(runner_context);
    let mut scheduler = Scheduler::new(
        definition.scenario.clone(),
        runner_context.clone(),
        aggregator.clone(),
        vu_stats.clone(),
        plan.pacing,
    );

    // Background reporting stops when the ramp is over, not when the run is cancelled.
    let ramp_finished = surge_core::prelude::ShutdownHandle::new();
    if let Some(planned) = plan.profile.planned_duration() {
        if !definition.no_progress {
            start_progress(
                planned,
                vu_stats.clone(),
                aggregator.clone(),
                ramp_finished.new_listener(),
            );
        }
    }
    start_monitor(ramp_finished.new_listener());

    states.transition(RunState::Ramping);
    let controller = RampController::new(plan.profile.clone(), plan.ramp_interval);
    let ramp_end = controller.run(&executor, signals.cancel.new_listener(), |target| {
        scheduler.reconcile(target)
    });
    ramp_finished.shutdown();

    states.transition(RunState::Draining);
    let stragglers = scheduler.drain(plan.graceful_stop);
    if stragglers > 0 {
        log::warn!(
            "{} virtual users were still running after the graceful stop of {}, aborting their iterations",
            stragglers,
            humantime::format_duration(plan.graceful_stop)
        );
        signals.abort.shutdown();
        scheduler.join_all();
    }

    states.transition(RunState::Evaluating);
    let snapshot = aggregator.finalize();

    if let Err(e) = catch_hook(|| definition.scenario.teardown(runner_context.clone())) {
        // Best effort, the results are still reported.
        log::error!("Teardown failed: {:?}", e);
    }

    let threshold_report = evaluate_thresholds(&snapshot, &plan.thresholds);
    for verdict in &threshold_report.verdicts {
        match &verdict.verdict {
            Verdict::Passed { observed } => {
                log::info!("Threshold {} passed with {:.3}", verdict.threshold, observed)
            }
            Verdict::Failed { observed } => {
                log::warn!("Threshold {} breached with {:.3}", verdict.threshold, observed)
            }
            Verdict::Inconclusive { reason } => {
                log::warn!("Threshold {} is inconclusive: {}", verdict.threshold, reason)
            }
        }
    }

    let vus = vu_stats.snapshot();
    SummaryReport::new(&snapshot, &threshold_report)
        .with_vus(VuSummary {
            peak: vus.peak,
            started: vus.started,
            bailed: vus.bailed,
            setup_failures: vus.setup_failures,
        })
        .print();

    let overall_passed = threshold_report.overall_passed();
    let failures = FailureCounts {
        iterations_failed: snapshot.iterations.failed,
        iterations_interrupted: snapshot.iterations.interrupted,
        checks_failed: snapshot.check_totals().fails,
        requests_failed: snapshot.request_totals.outcomes.fails,
        thresholds_breached: threshold_report.breached(),
        thresholds_inconclusive: threshold_report.inconclusive(),
        vus_bailed: vus.bailed,
        vu_setup_failures: vus.setup_failures,
    };

    let mut summary = new_run_summary(&definition, &run_id, started_at);
    summary.peak_vus = vus.peak;
    summary.iterations_completed = snapshot.iterations.completed;
    summary.iterations_failed = snapshot.iterations.failed;
    summary.iterations_interrupted = snapshot.iterations.interrupted;
    summary.cancelled = ramp_end == RampEnd::Cancelled;
    summary.passed = overall_passed;
    summary.verdicts = threshold_report
        .verdicts
        .iter()
        .map(|v| (v.threshold.to_string(), v.verdict.to_string()))
        .collect();
    write_run_summary(&definition, summary);

    states.transition(RunState::Done);

    Ok(RunOutcome::Completed(RunResult {
        snapshot,
        threshold_report,
        overall_passed,
        cancelled: ramp_end == RampEnd::Cancelled,
        failures,
        vus,
        state_history: states.history,
    }))
}

fn new_run_summary<S: Scenario>(
    definition: &ScenarioDefinition<S>,
    run_id: &str,
    started_at: i64,
) -> RunSummary {
    let profile = &definition.plan.profile;
    let mut summary = RunSummary::new(
        run_id.to_string(),
        definition.name.clone(),
        started_at,
        profile.planned_duration().map(|d| d.as_secs()),
        profile.start_vus(),
        profile
            .stages()
            .iter()
            .map(|s| StageSummary {
                duration_ms: u64::try_from(s.duration.as_millis()).unwrap_or(u64::MAX),
                target: s.target,
            })
            .collect(),
        definition.threshold_config(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    summary.soak = profile.bound() == RunBound::Unbounded;
    if let Ok(value) = std::env::var("RUST_LOG") {
        summary.add_env("RUST_LOG".to_string(), value);
    }
    summary
}

fn write_run_summary<S: Scenario>(definition: &ScenarioDefinition<S>, summary: RunSummary) {
    let Some(path) = &definition.summary_file else {
        return;
    };

    log::debug!(
        "Writing summary for run {} with fingerprint {}",
        summary.run_id,
        summary.fingerprint()
    );
    if let Err(e) = append_run_summary(summary, path.clone()) {
        log::error!("Failed to write run summary to {}: {:?}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!("setting up", RunState::SettingUp.to_string());
        assert_eq!("done", RunState::Done.to_string());
    }

    #[test]
    fn exit_codes() {
        let result = RunResult {
            snapshot: MetricSnapshot::default(),
            threshold_report: ThresholdReport::default(),
            overall_passed: true,
            cancelled: false,
            failures: FailureCounts::default(),
            vus: VuStats::default(),
            state_history: vec![],
        };

        assert_eq!(0, RunOutcome::Completed(result.clone()).exit_code());
        assert_eq!(
            EXIT_THRESHOLDS_FAILED,
            RunOutcome::Completed(RunResult {
                overall_passed: false,
                ..result
            })
            .exit_code()
        );
        assert_eq!(
            EXIT_SETUP_FAILED,
            RunOutcome::SetupFailed {
                error: anyhow::anyhow!("no schema"),
                state_history: vec![],
            }
            .exit_code()
        );
    }
}
