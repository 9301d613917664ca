mod tables;

use std::fmt::Write;

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::report::tables::{CheckRow, CounterRow, ThresholdRow, TrendRow, VirtualUserRow};
use crate::{MetricSnapshot, PassFail, ThresholdReport, Trend, Verdict};

/// Virtual user totals for the summary, as counted by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VuSummary {
    pub peak: usize,
    pub started: usize,
    pub bailed: usize,
    pub setup_failures: usize,
}

/// End of run summary, rendered as a set of tables.
pub struct SummaryReport<'a> {
    snapshot: &'a MetricSnapshot,
    thresholds: &'a ThresholdReport,
    vus: Option<VuSummary>,
}

impl<'a> SummaryReport<'a> {
    pub fn new(snapshot: &'a MetricSnapshot, thresholds: &'a ThresholdReport) -> Self {
        Self {
            snapshot,
            thresholds,
            vus: None,
        }
    }

    pub fn with_vus(mut self, vus: VuSummary) -> Self {
        self.vus = Some(vus);
        self
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let snapshot = self.snapshot;

        let _ = writeln!(
            out,
            "\nRan for {:.2}s: {} iterations completed, {} failed, {} interrupted",
            snapshot.elapsed.as_secs_f64(),
            snapshot.iterations.completed,
            snapshot.iterations.failed,
            snapshot.iterations.interrupted
        );

        if let Some(vus) = self.vus {
            let rows = vec![
                VirtualUserRow {
                    label: "peak",
                    count: vus.peak,
                },
                VirtualUserRow {
                    label: "started",
                    count: vus.started,
                },
                VirtualUserRow {
                    label: "bailed",
                    count: vus.bailed,
                },
                VirtualUserRow {
                    label: "setup failed",
                    count: vus.setup_failures,
                },
            ];
            push_table(&mut out, "Virtual users", rows);
        }

        if !snapshot.checks.is_empty() {
            let mut rows = snapshot
                .checks
                .iter()
                .map(|(name, checks)| check_row(name.clone(), checks))
                .collect::<Vec<_>>();
            rows.push(check_row("all checks".to_string(), &snapshot.check_totals()));
            push_table(&mut out, "Checks", rows);
        }

        let mut counters = vec![CounterRow {
            metric: "iterations".to_string(),
            count: snapshot.iterations.completed,
            per_second: self.per_second(snapshot.iterations.completed),
            failed_rate: crate::Rate {
                hits: snapshot.iterations.failed,
                total: snapshot.iterations.completed,
            }
            .value(),
        }];
        counters.push(CounterRow {
            metric: "requests".to_string(),
            count: snapshot.request_totals.outcomes.total(),
            per_second: self.per_second(snapshot.request_totals.outcomes.total()),
            failed_rate: snapshot.request_totals.failed_rate().value(),
        });
        counters.extend(snapshot.requests.iter().map(|(op, stats)| CounterRow {
            metric: format!("requests{{{}}}", op),
            count: stats.outcomes.total(),
            per_second: self.per_second(stats.outcomes.total()),
            failed_rate: stats.failed_rate().value(),
        }));
        push_table(&mut out, "Counters", counters);

        let mut trends = vec![
            trend_row("iteration_duration".to_string(), &snapshot.iteration_duration),
            trend_row(
                "request_duration".to_string(),
                &snapshot.request_totals.duration,
            ),
        ];
        trends.extend(snapshot.requests.iter().map(|(op, stats)| {
            trend_row(format!("request_duration{{{}}}", op), &stats.duration)
        }));
        push_table(&mut out, "Trends", trends);

        if !self.thresholds.verdicts.is_empty() {
            let rows = self
                .thresholds
                .verdicts
                .iter()
                .map(|v| ThresholdRow {
                    metric: v.threshold.metric.to_string(),
                    expression: v.threshold.expression.to_string(),
                    observed: v.verdict.observed(),
                    verdict: match &v.verdict {
                        Verdict::Inconclusive { reason } => format!("inconclusive ({})", reason),
                        other => other.to_string(),
                    },
                })
                .collect::<Vec<_>>();
            push_table(&mut out, "Thresholds", rows);

            let _ = writeln!(
                out,
                "\nThresholds {}: {} breached, {} inconclusive",
                if self.thresholds.overall_passed() {
                    "passed"
                } else {
                    "failed"
                },
                self.thresholds.breached(),
                self.thresholds.inconclusive()
            );
        }

        if snapshot.rejected > 0 {
            let _ = writeln!(
                out,
                "\n{} iteration outcomes arrived after the run was finalized and were not counted",
                snapshot.rejected
            );
        }

        out
    }

    fn per_second(&self, count: u64) -> Option<f64> {
        let seconds = self.snapshot.elapsed.as_secs_f64();
        (seconds > 0.0).then(|| count as f64 / seconds)
    }
}

fn check_row(check: String, checks: &PassFail) -> CheckRow {
    CheckRow {
        check,
        passes: checks.passes,
        fails: checks.fails,
        pass_rate: crate::Rate {
            hits: checks.passes,
            total: checks.total(),
        }
        .value(),
    }
}

fn trend_row(metric: String, trend: &Trend) -> TrendRow {
    let summary = trend.summary();
    TrendRow {
        metric,
        count: summary.count,
        avg_ms: summary.avg_ms,
        min_ms: summary.min_ms,
        med_ms: summary.med_ms,
        max_ms: summary.max_ms,
        p90_ms: summary.p90_ms,
        p95_ms: summary.p95_ms,
    }
}

fn push_table<T: Tabled>(out: &mut String, title: &str, rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::modern());

    let _ = writeln!(out, "\n{}", title);
    let _ = writeln!(out, "{}", table);
}
