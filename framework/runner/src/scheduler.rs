use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use surge_core::prelude::ShutdownHandle;
use surge_instruments::MetricsAggregator;

use crate::context::{RunnerContext, VirtualUserContext};
use crate::definition::Scenario;
use crate::iteration::{catch_hook, run_once, IterationEnd};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Live counters for the virtual user pool. Updated by the scheduler and its workers, readable
/// from anywhere through [RunnerContext::vu_stats].
#[derive(Debug, Default)]
pub struct SchedulerStats {
    live: AtomicUsize,
    draining: AtomicUsize,
    in_flight: AtomicUsize,
    started: AtomicUsize,
    peak: AtomicUsize,
    bailed: AtomicUsize,
    setup_failures: AtomicUsize,
}

impl SchedulerStats {
    /// Virtual users that are running and have not been asked to stop.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Virtual users that have been asked to stop and are finishing their current iteration.
    pub fn draining(&self) -> usize {
        self.draining.load(Ordering::Acquire)
    }

    /// Virtual users with an iteration in progress right now.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> VuStats {
        VuStats {
            live: self.live(),
            draining: self.draining(),
            in_flight: self.in_flight(),
            started: self.started.load(Ordering::Acquire),
            peak: self.peak.load(Ordering::Acquire),
            bailed: self.bailed.load(Ordering::Acquire),
            setup_failures: self.setup_failures.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VuStats {
    pub live: usize,
    pub draining: usize,
    pub in_flight: usize,
    /// Every virtual user started during the run, including replacements.
    pub started: usize,
    pub peak: usize,
    pub bailed: usize,
    pub setup_failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    Stopped,
    Bailed,
    SetupFailed,
}

struct Worker {
    vu_id: usize,
    stop_handle: ShutdownHandle,
    handle: JoinHandle<WorkerExit>,
}

/// Owns the pool of virtual users and grows or shrinks it to match a target.
///
/// Every virtual user runs on its own thread. Users are only ever stopped between iterations.
pub(crate) struct Scheduler<S: Scenario> {
    scenario: Arc<S>,
    runner_context: Arc<RunnerContext<S::RunnerValue>>,
    aggregator: Arc<MetricsAggregator>,
    stats: Arc<SchedulerStats>,
    pacing: Option<Duration>,
    next_vu_id: usize,
    live: Vec<Worker>,
    draining: Vec<Worker>,
}

impl<S: Scenario> Scheduler<S> {
    pub(crate) fn new(
        scenario: Arc<S>,
        runner_context: Arc<RunnerContext<S::RunnerValue>>,
        aggregator: Arc<MetricsAggregator>,
        stats: Arc<SchedulerStats>,
        pacing: Option<Duration>,
    ) -> Self {
        Self {
            scenario,
            runner_context,
            aggregator,
            stats,
            pacing,
            next_vu_id: 0,
            live: Vec::new(),
            draining: Vec::new(),
        }
    }

    /// Start or stop virtual users so that `target` are live.
    ///
    /// Users that have exited on their own, by bailing or failing setup, are replaced. Excess users
    /// are stopped most recent first.
    pub(crate) fn reconcile(&mut self, target: usize) {
        self.reap();

        while self.live.len() < target {
            match self.spawn_worker() {
                Ok(worker) => self.live.push(worker),
                Err(e) => {
                    log::error!("Failed to start a virtual user, will retry: {:?}", e);
                    break;
                }
            }
        }

        if self.live.len() > target {
            let excess = self.live.len() - target;
            log::debug!("Stopping {} virtual users", excess);
            for worker in self.live.drain(target..).rev() {
                worker.stop_handle.shutdown();
                self.draining.push(worker);
            }
        }

        self.publish();
    }

    /// Stop every virtual user and wait up to `timeout` for them to finish. Returns the number of
    /// users that were still running when the timeout elapsed.
    pub(crate) fn drain(&mut self, timeout: Duration) -> usize {
        self.reconcile(0);

        let deadline = Instant::now().checked_add(timeout);
        loop {
            self.reap();
            self.publish();

            if self.draining.is_empty() {
                return 0;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return self.draining.len();
            }

            std::thread::sleep(DRAIN_POLL_INTERVAL);
        }
    }

    /// Block until every worker has exited. Only call this once the workers have been stopped.
    pub(crate) fn join_all(&mut self) {
        self.reconcile(0);
        for worker in self.draining.drain(..) {
            join_worker(worker);
        }
        self.publish();
    }

    fn reap(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .live
            .drain(..)
            .partition(|worker| worker.handle.is_finished());
        self.live = running;
        finished.into_iter().for_each(join_worker);

        let (finished, running): (Vec<_>, Vec<_>) = self
            .draining
            .drain(..)
            .partition(|worker| worker.handle.is_finished());
        self.draining = running;
        finished.into_iter().for_each(join_worker);
    }

    fn publish(&self) {
        self.stats.live.store(self.live.len(), Ordering::Release);
        self.stats
            .draining
            .store(self.draining.len(), Ordering::Release);
        self.stats.peak.fetch_max(self.live.len(), Ordering::AcqRel);
    }

    fn spawn_worker(&mut self) -> std::io::Result<Worker> {
        let vu_id = self.next_vu_id;
        let stop_handle = ShutdownHandle::new();
        let ctx = VirtualUserContext::new(
            vu_id,
            self.runner_context.clone(),
            stop_handle.new_listener(),
        );

        let scenario = self.scenario.clone();
        let aggregator = self.aggregator.clone();
        let stats = self.stats.clone();
        let pacing = self.pacing;

        let handle = std::thread::Builder::new()
            .name(format!("vu-{}", vu_id))
            .spawn(move || worker_loop(&*scenario, ctx, &aggregator, &stats, pacing))?;

        self.next_vu_id += 1;
        self.stats.started.fetch_add(1, Ordering::AcqRel);

        Ok(Worker {
            vu_id,
            stop_handle,
            handle,
        })
    }
}

fn join_worker(worker: Worker) {
    match worker.handle.join() {
        Ok(exit) => log::debug!("vu-{} exited: {:?}", worker.vu_id, exit),
        Err(_) => log::error!("vu-{} panicked outside of a scenario hook", worker.vu_id),
    }
}

fn worker_loop<S: Scenario>(
    scenario: &S,
    mut ctx: VirtualUserContext<S::RunnerValue, S::UserValue>,
    aggregator: &MetricsAggregator,
    stats: &SchedulerStats,
    pacing: Option<Duration>,
) -> WorkerExit {
    if let Err(e) = catch_hook(|| scenario.setup_user(&mut ctx)) {
        log::error!("User setup failed for vu-{}: {:?}", ctx.vu_id(), e);
        stats.setup_failures.fetch_add(1, Ordering::AcqRel);
        return WorkerExit::SetupFailed;
    }

    let exit = loop {
        if ctx.should_stop() {
            break WorkerExit::Stopped;
        }

        stats.in_flight.fetch_add(1, Ordering::AcqRel);
        let (outcome, end) = run_once(scenario, &mut ctx);
        stats.in_flight.fetch_sub(1, Ordering::AcqRel);

        aggregator.record(outcome);

        if end == IterationEnd::Bail {
            stats.bailed.fetch_add(1, Ordering::AcqRel);
            break WorkerExit::Bailed;
        }

        if let Some(pacing) = pacing {
            ctx.pace(pacing);
        }
    };

    if let Err(e) = catch_hook(|| scenario.teardown_user(&mut ctx)) {
        log::error!("User teardown failed for vu-{}: {:?}", ctx.vu_id(), e);
    }

    exit
}
