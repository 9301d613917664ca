use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::SurgeScenarioCli;
use crate::config::{PlanConfig, RunPlan, StageConfig, ThresholdExprs};
use crate::context::{RunnerContext, UserValuesConstraint, VirtualUserContext};

pub type HookResult = anyhow::Result<()>;

/// The workload of a load test.
///
/// Only [Scenario::iterate] is required. The scenario is shared by every virtual user and is not
/// mutated once the run starts, per-run state belongs in [Scenario::RunnerValue] and per-user state
/// in [Scenario::UserValue].
pub trait Scenario: Send + Sync + 'static {
    /// Shared state, written by [Scenario::setup] and read by every virtual user.
    type RunnerValue: UserValuesConstraint;
    /// Private state of one virtual user, kept across its iterations.
    type UserValue: UserValuesConstraint;

    /// Runs once, before any virtual user is started. An error here fails the run before any
    /// iteration is attempted.
    fn setup(&self, _ctx: &mut RunnerContext<Self::RunnerValue>) -> HookResult {
        Ok(())
    }

    /// Runs once for each virtual user as it starts. If it fails, the virtual user exits without
    /// running any iterations.
    fn setup_user(
        &self,
        _ctx: &mut VirtualUserContext<Self::RunnerValue, Self::UserValue>,
    ) -> HookResult {
        Ok(())
    }

    /// One iteration. Returning an error counts the iteration as failed and the virtual user carries
    /// on, unless the error is a [surge_core::prelude::VuBailError].
    fn iterate(&self, ctx: &mut VirtualUserContext<Self::RunnerValue, Self::UserValue>)
        -> HookResult;

    /// Runs once for each virtual user as it stops, best effort.
    fn teardown_user(
        &self,
        _ctx: &mut VirtualUserContext<Self::RunnerValue, Self::UserValue>,
    ) -> HookResult {
        Ok(())
    }

    /// Runs once after every virtual user has stopped, best effort.
    fn teardown(&self, _ctx: Arc<RunnerContext<Self::RunnerValue>>) -> HookResult {
        Ok(())
    }
}

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the scenario that you want to run. The
/// `with_default_*` values are the lowest layer of configuration, they are overridden by a config
/// file and then by the command line.
pub struct ScenarioDefinitionBuilder<S: Scenario> {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    cli: SurgeScenarioCli,
    scenario: S,
    defaults: PlanConfig,
}

pub struct ScenarioDefinition<S: Scenario> {
    pub name: String,
    pub scenario: Arc<S>,
    pub plan: RunPlan,
    pub no_progress: bool,
    pub run_id: Option<String>,
    pub summary_file: Option<PathBuf>,
}

impl<S: Scenario> ScenarioDefinitionBuilder<S> {
    /// Initialise a new scenario definition from the scenario name and parsed command line
    /// arguments.
    pub fn new(name: &str, cli: SurgeScenarioCli, scenario: S) -> Self {
        Self {
            name: name.to_string(),
            cli,
            scenario,
            defaults: PlanConfig::default(),
        }
    }

    /// Initialise logging and parse the command line, then create the scenario definition.
    pub fn new_with_init(name: &str, scenario: S) -> Self {
        Self::new(name, crate::init::init(), scenario)
    }

    pub fn with_default_target_url(mut self, target_url: &str) -> Self {
        self.defaults.target_url = Some(target_url.to_string());
        self
    }

    pub fn with_default_vus(mut self, vus: usize) -> Self {
        self.defaults.vus = Some(vus);
        self
    }

    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.defaults.duration = Some(duration);
        self
    }

    pub fn with_default_duration_s(self, duration: u64) -> Self {
        self.with_default_duration(Duration::from_secs(duration))
    }

    /// Append a stage to the default ramp profile.
    pub fn with_default_stage(mut self, duration: Duration, target: usize) -> Self {
        self.defaults.stages.push(StageConfig { duration, target });
        self
    }

    /// Add a default threshold, for example `("http_req_duration", "p(95)<1000")`.
    pub fn with_default_threshold(mut self, metric: &str, expression: &str) -> Self {
        let exprs = self
            .defaults
            .thresholds
            .entry(metric.to_string())
            .or_insert_with(|| ThresholdExprs::Many(Vec::new()));
        if let ThresholdExprs::Many(exprs) = exprs {
            exprs.push(expression.to_string());
        }
        self
    }

    pub fn with_default_pacing(mut self, pacing: Duration) -> Self {
        self.defaults.pacing = Some(pacing);
        self
    }

    pub fn with_default_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.defaults.graceful_stop = Some(graceful_stop);
        self
    }

    /// How often the ramp target is recomputed. Defaults to 100ms.
    pub fn with_ramp_interval(mut self, ramp_interval: Duration) -> Self {
        self.defaults.ramp_interval = Some(ramp_interval);
        self
    }

    pub(crate) fn build(self) -> anyhow::Result<ScenarioDefinition<S>> {
        let mut layered = self.defaults;
        if let Some(path) = &self.cli.config {
            log::info!("Loading run configuration from {}", path.display());
            layered = PlanConfig::load(path)?.layered_over(layered);
        }
        let plan = PlanConfig::from(&self.cli).layered_over(layered).into_plan()?;

        log::debug!("Resolved run plan: {:?}", plan);

        Ok(ScenarioDefinition {
            name: self.name,
            scenario: Arc::new(self.scenario),
            plan,
            no_progress: self.cli.no_progress,
            run_id: self.cli.run_id,
            summary_file: self.cli.summary_file,
        })
    }
}

impl<S: Scenario> ScenarioDefinition<S> {
    /// Thresholds as `metric -> expressions`, for reporting.
    pub(crate) fn threshold_config(&self) -> BTreeMap<String, Vec<String>> {
        let mut config: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for threshold in &self.plan.thresholds {
            config
                .entry(threshold.metric.to_string())
                .or_default()
                .push(threshold.expression.to_string());
        }
        config
    }
}
