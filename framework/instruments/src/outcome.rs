use std::time::Duration;

use crate::{CheckResult, OperationRecord};

/// Everything observed during one iteration of one virtual user.
///
/// This is handed to the [crate::MetricsAggregator] as a single batch so that a partially applied
/// iteration is never visible.
#[derive(Debug, Clone, Default)]
pub struct IterationOutcome {
    pub checks: Vec<CheckResult>,
    pub operations: Vec<OperationRecord>,
    pub duration: Duration,
    /// The iteration returned an error or panicked.
    pub failed: bool,
    /// The iteration was cut short by the hard abort at the end of a run.
    pub interrupted: bool,
}

impl IterationOutcome {
    pub fn succeeded(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    pub fn failed(duration: Duration) -> Self {
        Self {
            duration,
            failed: true,
            ..Default::default()
        }
    }

    pub fn with_checks(mut self, checks: Vec<CheckResult>) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_operations(mut self, operations: Vec<OperationRecord>) -> Self {
        self.operations = operations;
        self
    }
}
