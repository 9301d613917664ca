mod aggregator;
mod check;
mod metric;
mod outcome;
mod report;
mod snapshot;
mod threshold;
mod trend;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use aggregator::MetricsAggregator;
pub use check::{run_check, Check, CheckResult};
pub use metric::{MetricKey, MetricKind, MetricName};
pub use outcome::IterationOutcome;
pub use report::{SummaryReport, VuSummary};
pub use snapshot::{IterationCounts, MetricSnapshot, MetricValue, PassFail, Rate, RequestStats};
pub use threshold::{
    evaluate_thresholds, Aggregation, Comparison, Threshold, ThresholdExpr, ThresholdParseError,
    ThresholdReport, ThresholdVerdict, Verdict,
};
pub use trend::{Trend, TrendSummary};

/// A single request made through a transport, as observed by an instrumented client.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub operation_id: String,
    started: Instant,
    pub elapsed: Option<Duration>,
    pub is_error: bool,
    pub attr: BTreeMap<String, String>,
}

impl OperationRecord {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            started: Instant::now(),
            elapsed: None,
            is_error: false,
            attr: BTreeMap::new(),
        }
    }

    /// Build a record for an operation that was timed elsewhere.
    pub fn completed(operation_id: impl Into<String>, elapsed: Duration, is_error: bool) -> Self {
        let mut record = Self::new(operation_id);
        record.elapsed = Some(elapsed);
        record.is_error = is_error;
        record
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.attr.insert(key.into(), value.to_string());
        self
    }

    /// Stop the clock for this operation.
    pub fn finish(&mut self, is_error: bool) {
        self.elapsed = Some(self.started.elapsed());
        self.is_error = is_error;
    }

    pub fn duration(&self) -> Option<Duration> {
        self.elapsed
    }
}

/// Collects the operations made by one virtual user until the iteration runner takes them.
///
/// Cheap to clone. Each virtual user owns its own recorder so there is no contention between
/// users, the lock only guards against the transport finishing an operation on a runtime thread.
#[derive(Debug, Clone, Default)]
pub struct OperationRecorder {
    records: Arc<Mutex<Vec<OperationRecord>>>,
}

impl OperationRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: OperationRecord) {
        if record.elapsed.is_none() {
            log::warn!(
                "Operation {} was recorded without being finished, dropping it",
                record.operation_id
            );
            return;
        }

        self.records.lock().push(record);
    }

    pub fn take(&self) -> Vec<OperationRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

/// Finish an operation record based on the result of the operation and hand it to the recorder.
pub fn report_operation<T, E>(
    recorder: &OperationRecorder,
    mut record: OperationRecord,
    response: &Result<T, E>,
) {
    record.finish(response.is_err());
    log::trace!(
        "Operation {} took {:?}, and failed? {}",
        record.operation_id,
        record.elapsed,
        record.is_error,
    );
    recorder.record(record);
}
