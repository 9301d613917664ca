use std::time::Duration;
use std::{fmt::Debug, sync::Arc};

use surge_core::prelude::{DelegatedShutdownListener, ShutdownHandle};
use surge_instruments::{CheckResult, MetricsAggregator, OperationRecorder};

use crate::executor::Executor;
use crate::scheduler::SchedulerStats;

pub trait UserValuesConstraint: Default + Debug + Send + Sync + 'static {}

impl UserValuesConstraint for () {}

/// State shared by every virtual user in a run. It is filled in by the scenario's `setup` hook and
/// is read-only once virtual users start.
#[derive(Debug)]
pub struct RunnerContext<RV: UserValuesConstraint> {
    executor: Arc<Executor>,
    cancel_handle: ShutdownHandle,
    vu_stats: Arc<SchedulerStats>,
    pub(crate) aggregator: Arc<MetricsAggregator>,
    target_url: Option<String>,
    run_id: String,
    value: RV,
}

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    pub(crate) fn new(
        executor: Arc<Executor>,
        cancel_handle: ShutdownHandle,
        vu_stats: Arc<SchedulerStats>,
        aggregator: Arc<MetricsAggregator>,
        target_url: Option<String>,
        run_id: String,
    ) -> Self {
        Self {
            executor,
            cancel_handle,
            vu_stats,
            aggregator,
            target_url,
            run_id,
            value: Default::default(),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// The URL of the service under test, if one was configured.
    pub fn target_url(&self) -> Option<&str> {
        self.target_url.as_deref()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Live counts of virtual users for this run.
    pub fn vu_stats(&self) -> &SchedulerStats {
        &self.vu_stats
    }

    /// Stop ramping and drain the run, as if the profile had completed.
    pub fn force_stop_scenario(&self) {
        log::info!("Scenario requested the run to stop");
        self.cancel_handle.shutdown();
    }

    pub fn get_mut(&mut self) -> &mut RV {
        &mut self.value
    }

    pub fn get(&self) -> &RV {
        &self.value
    }
}

/// The private state of one virtual user. It is owned by that user's worker thread for its whole
/// lifetime and persists across iterations.
pub struct VirtualUserContext<RV: UserValuesConstraint, V: UserValuesConstraint> {
    vu_id: usize,
    runner_context: Arc<RunnerContext<RV>>,
    stop_listener: DelegatedShutdownListener,
    recorder: OperationRecorder,
    pub(crate) checks: Vec<CheckResult>,
    iteration: u64,
    value: V,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> VirtualUserContext<RV, V> {
    pub(crate) fn new(
        vu_id: usize,
        runner_context: Arc<RunnerContext<RV>>,
        stop_listener: DelegatedShutdownListener,
    ) -> Self {
        Self {
            vu_id,
            runner_context,
            stop_listener,
            recorder: OperationRecorder::new(),
            checks: Vec::new(),
            iteration: 0,
            value: Default::default(),
        }
    }

    pub fn vu_id(&self) -> usize {
        self.vu_id
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner_context
    }

    /// Listener for this virtual user's stop signal. The signal fires when the user is ramped down
    /// or the run is draining; the current iteration is still allowed to finish.
    pub fn shutdown_listener(&mut self) -> &mut DelegatedShutdownListener {
        &mut self.stop_listener
    }

    /// Hand this to an instrumented client so its requests are attributed to the iteration.
    pub fn recorder(&self) -> &OperationRecorder {
        &self.recorder
    }

    /// The number of the current iteration, starting from 1. Zero during `setup_user`.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Think time inside an iteration.
    ///
    /// A graceful stop does not cut this short, only the hard abort does, in which case an error is
    /// returned that marks the iteration as interrupted.
    pub fn sleep(&self, duration: Duration) -> anyhow::Result<()> {
        self.runner_context.executor().execute_in_place(async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }

    pub fn get_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn get(&self) -> &V {
        &self.value
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.stop_listener.should_shutdown()
    }

    pub(crate) fn begin_iteration(&mut self) {
        self.iteration += 1;
        self.checks.clear();
        // Anything recorded outside of an iteration is not attributed to one.
        let stray = self.recorder.take();
        if !stray.is_empty() {
            log::debug!(
                "Discarding {} operations recorded outside of an iteration by vu-{}",
                stray.len(),
                self.vu_id
            );
        }
    }

    /// Wait between iterations. Returns early if this virtual user is told to stop.
    pub(crate) fn pace(&mut self, pacing: Duration) {
        let executor = self.runner_context.executor().clone();
        let listener = &mut self.stop_listener;
        executor.block_on(async move {
            tokio::select! {
                _ = tokio::time::sleep(pacing) => {},
                _ = listener.wait_for_shutdown() => {},
            }
        });
    }
}
