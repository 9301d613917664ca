use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::{MetricKey, MetricName, Trend};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassFail {
    pub passes: u64,
    pub fails: u64,
}

impl PassFail {
    pub fn add(&mut self, passed: bool) {
        if passed {
            self.passes += 1;
        } else {
            self.fails += 1;
        }
    }

    pub fn merge(&mut self, other: &PassFail) {
        self.passes += other.passes;
        self.fails += other.fails;
    }

    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }
}

/// A ratio of `hits` over `total` samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub hits: u64,
    pub total: u64,
}

impl Rate {
    pub fn value(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hits as f64 / self.total as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IterationCounts {
    /// Iterations that ran to the end, including those that failed.
    pub completed: u64,
    pub failed: u64,
    /// Iterations cut short by the hard abort. They are not counted as completed and their
    /// duration is not recorded.
    pub interrupted: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RequestStats {
    pub outcomes: PassFail,
    pub duration: Trend,
}

impl RequestStats {
    pub fn merge(&mut self, other: &RequestStats) {
        self.outcomes.merge(&other.outcomes);
        self.duration.merge(&other.duration);
    }

    pub fn failed_rate(&self) -> Rate {
        Rate {
            hits: self.outcomes.fails,
            total: self.outcomes.total(),
        }
    }
}

/// The value of one metric, as seen by threshold evaluation.
#[derive(Debug, Clone, Copy)]
pub enum MetricValue<'a> {
    Counter { count: u64, elapsed: Duration },
    Rate(Rate),
    Trend(&'a Trend),
}

/// An immutable view over everything the aggregator has recorded.
#[derive(Debug, Clone, Default)]
pub struct MetricSnapshot {
    pub elapsed: Duration,
    pub iterations: IterationCounts,
    pub iteration_duration: Trend,
    pub checks: BTreeMap<String, PassFail>,
    /// Request statistics per operation id.
    pub requests: BTreeMap<String, RequestStats>,
    /// Request statistics over every operation.
    pub request_totals: RequestStats,
    /// Outcomes offered to the aggregator after it was sealed.
    pub rejected: u64,
}

impl MetricSnapshot {
    pub fn check_totals(&self) -> PassFail {
        self.checks
            .values()
            .fold(PassFail::default(), |mut acc, checks| {
                acc.merge(checks);
                acc
            })
    }

    /// Look up a metric. Returns `None` when a selector names a check or operation that was
    /// never recorded.
    pub fn value(&self, key: &MetricKey) -> Option<MetricValue<'_>> {
        let selector = key.selector.as_deref();

        let value = match (key.name, selector) {
            (MetricName::Iterations, _) => MetricValue::Counter {
                count: self.iterations.completed,
                elapsed: self.elapsed,
            },
            (MetricName::IterationFailed, _) => MetricValue::Rate(Rate {
                hits: self.iterations.failed,
                total: self.iterations.completed,
            }),
            (MetricName::IterationDuration, _) => MetricValue::Trend(&self.iteration_duration),
            (MetricName::Checks, None) => {
                let totals = self.check_totals();
                MetricValue::Rate(Rate {
                    hits: totals.passes,
                    total: totals.total(),
                })
            }
            (MetricName::Checks, Some(name)) => {
                let checks = self.checks.get(name)?;
                MetricValue::Rate(Rate {
                    hits: checks.passes,
                    total: checks.total(),
                })
            }
            (MetricName::Requests, None) => MetricValue::Counter {
                count: self.request_totals.outcomes.total(),
                elapsed: self.elapsed,
            },
            (MetricName::Requests, Some(op)) => MetricValue::Counter {
                count: self.requests.get(op)?.outcomes.total(),
                elapsed: self.elapsed,
            },
            (MetricName::RequestFailed, None) => {
                MetricValue::Rate(self.request_totals.failed_rate())
            }
            (MetricName::RequestFailed, Some(op)) => {
                MetricValue::Rate(self.requests.get(op)?.failed_rate())
            }
            (MetricName::RequestDuration, None) => {
                MetricValue::Trend(&self.request_totals.duration)
            }
            (MetricName::RequestDuration, Some(op)) => {
                MetricValue::Trend(&self.requests.get(op)?.duration)
            }
        };

        Some(value)
    }
}
