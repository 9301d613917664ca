mod check;
mod cli;
mod config;
mod context;
mod controller;
mod definition;
mod executor;
mod init;
mod iteration;
mod monitor;
mod progress;
mod ramp;
mod run;
mod scheduler;
mod shutdown;
mod types;

pub mod prelude {
    pub use crate::cli::SurgeScenarioCli;
    pub use crate::config::{ConfigError, PlanConfig, RunPlan, StageConfig};
    pub use crate::context::UserValuesConstraint;
    pub use crate::context::{RunnerContext, VirtualUserContext};
    pub use crate::definition::{HookResult, Scenario, ScenarioDefinitionBuilder};
    pub use crate::executor::Executor;
    pub use crate::ramp::{RampPoint, RampProfile, RunBound, Stage};
    pub use crate::run::{
        run, FailureCounts, RunOutcome, RunResult, RunState, StateTransition,
        EXIT_SETUP_FAILED, EXIT_THRESHOLDS_FAILED,
    };
    pub use crate::scheduler::{SchedulerStats, VuStats};
    pub use crate::types::SurgeResult;

    pub use surge_core::prelude::{ShutdownSignalError, VuBailError};
    pub use surge_instruments::{
        report_operation, Check, CheckResult, MetricSnapshot, OperationRecord, OperationRecorder,
        ThresholdReport, Verdict,
    };
}
