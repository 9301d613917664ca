use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

use crate::{MetricKey, MetricKind, MetricSnapshot, MetricValue};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdParseError {
    #[error("Unknown metric `{0}`")]
    UnknownMetric(String),
    #[error("Invalid metric selector in `{0}`")]
    InvalidSelector(String),
    #[error("Metric `{0}` cannot be narrowed with a selector")]
    SelectorNotSupported(String),
    #[error("Empty threshold expression")]
    EmptyExpression,
    #[error("Unknown aggregation `{0}`")]
    UnknownAggregation(String),
    #[error("Invalid percentile in `{0}`, expected p(N) with 0 < N <= 100")]
    InvalidPercentile(String),
    #[error("Missing comparison operator in `{0}`")]
    MissingOperator(String),
    #[error("Invalid threshold value in `{0}`")]
    InvalidValue(String),
    #[error("Aggregation `{aggregation}` does not apply to {kind} metric `{metric}`")]
    NotApplicable {
        aggregation: String,
        metric: String,
        kind: MetricKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    /// Fraction of hits for a rate metric, or events per second for a counter.
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

impl Aggregation {
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Aggregation::Count | Aggregation::Rate),
            MetricKind::Rate => matches!(self, Aggregation::Rate),
            MetricKind::Trend => matches!(
                self,
                Aggregation::Avg
                    | Aggregation::Min
                    | Aggregation::Max
                    | Aggregation::Med
                    | Aggregation::Percentile(_)
            ),
        }
    }
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregation::Rate => write!(f, "rate"),
            Aggregation::Count => write!(f, "count"),
            Aggregation::Avg => write!(f, "avg"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Max => write!(f, "max"),
            Aggregation::Med => write!(f, "med"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    // Two character operators first so that `<=` is not read as `<`.
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    pub fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => observed < limit,
            Comparison::Le => observed <= limit,
            Comparison::Gt => observed > limit,
            Comparison::Ge => observed >= limit,
            Comparison::Eq => observed == limit,
            Comparison::Ne => observed != limit,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

/// A parsed threshold expression such as `p(95)<1000` or `rate<0.05`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub value: f64,
}

impl FromStr for ThresholdExpr {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr = s.trim();
        if expr.is_empty() {
            return Err(ThresholdParseError::EmptyExpression);
        }

        let (position, symbol, comparison) = Comparison::OPERATORS
            .iter()
            .filter_map(|(symbol, comparison)| {
                expr.find(symbol).map(|position| (position, *symbol, *comparison))
            })
            // Leftmost operator wins, ties go to the longer operator which is listed first.
            .min_by_key(|(position, _, _)| *position)
            .ok_or_else(|| ThresholdParseError::MissingOperator(expr.to_string()))?;

        let aggregation = parse_aggregation(expr[..position].trim())?;
        let value_str = expr[position + symbol.len()..].trim();
        let value = value_str
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ThresholdParseError::InvalidValue(expr.to_string()))?;

        Ok(ThresholdExpr {
            aggregation,
            comparison,
            value,
        })
    }
}

fn parse_aggregation(token: &str) -> Result<Aggregation, ThresholdParseError> {
    if let Some(inner) = token.strip_prefix("p(").and_then(|t| t.strip_suffix(')')) {
        return inner
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|p| *p > 0.0 && *p <= 100.0)
            .map(Aggregation::Percentile)
            .ok_or_else(|| ThresholdParseError::InvalidPercentile(token.to_string()));
    }

    match token {
        "rate" => Ok(Aggregation::Rate),
        "count" => Ok(Aggregation::Count),
        "avg" => Ok(Aggregation::Avg),
        "min" => Ok(Aggregation::Min),
        "max" => Ok(Aggregation::Max),
        "med" => Ok(Aggregation::Med),
        "" => Err(ThresholdParseError::EmptyExpression),
        other if other.starts_with('p') => {
            Err(ThresholdParseError::InvalidPercentile(other.to_string()))
        }
        other => Err(ThresholdParseError::UnknownAggregation(other.to_string())),
    }
}

impl Display for ThresholdExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregation,
            self.comparison.symbol(),
            self.value
        )
    }
}

/// A pass/fail criterion evaluated against the final metrics of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: MetricKey,
    pub expression: ThresholdExpr,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ThresholdParseError> {
        let metric: MetricKey = metric.parse()?;
        let expression: ThresholdExpr = expression.parse()?;

        if !expression.aggregation.applies_to(metric.kind()) {
            return Err(ThresholdParseError::NotApplicable {
                aggregation: expression.aggregation.to_string(),
                metric: metric.to_string(),
                kind: metric.kind(),
            });
        }

        Ok(Self { metric, expression })
    }

    /// Evaluate against a snapshot. This is a pure function of its inputs.
    pub fn evaluate(&self, snapshot: &MetricSnapshot) -> Verdict {
        let Some(value) = snapshot.value(&self.metric) else {
            return Verdict::Inconclusive {
                reason: format!("no samples recorded for `{}`", self.metric),
            };
        };

        let observed = match (value, self.expression.aggregation) {
            (MetricValue::Counter { count, .. }, _) if count == 0 => None,
            (MetricValue::Counter { count, .. }, Aggregation::Count) => Some(count as f64),
            (MetricValue::Counter { count, elapsed }, Aggregation::Rate) => {
                let seconds = elapsed.as_secs_f64();
                (seconds > 0.0).then(|| count as f64 / seconds)
            }
            (MetricValue::Rate(rate), Aggregation::Rate) => rate.value(),
            (MetricValue::Trend(trend), Aggregation::Avg) => trend.mean_ms(),
            (MetricValue::Trend(trend), Aggregation::Min) => trend.min_ms(),
            (MetricValue::Trend(trend), Aggregation::Max) => trend.max_ms(),
            (MetricValue::Trend(trend), Aggregation::Med) => trend.median_ms(),
            (MetricValue::Trend(trend), Aggregation::Percentile(p)) => trend.percentile_ms(p),
            (_, aggregation) => {
                return Verdict::Inconclusive {
                    reason: format!("`{}` does not apply to `{}`", aggregation, self.metric),
                }
            }
        };

        match observed {
            None => Verdict::Inconclusive {
                reason: format!("no samples recorded for `{}`", self.metric),
            },
            Some(observed)
                if self
                    .expression
                    .comparison
                    .holds(observed, self.expression.value) =>
            {
                Verdict::Passed { observed }
            }
            Some(observed) => Verdict::Failed { observed },
        }
    }
}

impl Display for Threshold {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Passed { observed: f64 },
    Failed { observed: f64 },
    /// The metric had no samples, which must never count as a pass.
    Inconclusive { reason: String },
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed { .. })
    }

    pub fn observed(&self) -> Option<f64> {
        match self {
            Verdict::Passed { observed } | Verdict::Failed { observed } => Some(*observed),
            Verdict::Inconclusive { .. } => None,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Passed { .. } => write!(f, "passed"),
            Verdict::Failed { .. } => write!(f, "failed"),
            Verdict::Inconclusive { .. } => write!(f, "inconclusive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdVerdict {
    pub threshold: Threshold,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdReport {
    pub verdicts: Vec<ThresholdVerdict>,
}

impl ThresholdReport {
    /// True only if every threshold passed. An empty report passes.
    pub fn overall_passed(&self) -> bool {
        self.verdicts.iter().all(|v| v.verdict.is_passed())
    }

    pub fn breached(&self) -> usize {
        self.verdicts
            .iter()
            .filter(|v| matches!(v.verdict, Verdict::Failed { .. }))
            .count()
    }

    pub fn inconclusive(&self) -> usize {
        self.verdicts
            .iter()
            .filter(|v| matches!(v.verdict, Verdict::Inconclusive { .. }))
            .count()
    }
}

pub fn evaluate_thresholds(snapshot: &MetricSnapshot, thresholds: &[Threshold]) -> ThresholdReport {
    ThresholdReport {
        verdicts: thresholds
            .iter()
            .map(|threshold| ThresholdVerdict {
                threshold: threshold.clone(),
                verdict: threshold.evaluate(snapshot),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IterationOutcome, MetricName, MetricsAggregator, OperationRecord};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn snapshot_with_failures(total: u64, failures: u64) -> MetricSnapshot {
        let aggregator = MetricsAggregator::new();
        for i in 0..total {
            let outcome = if i < failures {
                IterationOutcome::failed(Duration::from_millis(10))
            } else {
                IterationOutcome::succeeded(Duration::from_millis(10))
            };
            aggregator.record(outcome);
        }
        aggregator.finalize()
    }

    #[test]
    fn parse_expressions() {
        assert_eq!(
            ThresholdExpr {
                aggregation: Aggregation::Percentile(95.0),
                comparison: Comparison::Lt,
                value: 1000.0,
            },
            "p(95)<1000".parse().unwrap()
        );
        assert_eq!(
            ThresholdExpr {
                aggregation: Aggregation::Rate,
                comparison: Comparison::Le,
                value: 0.05,
            },
            " rate <= 0.05 ".parse().unwrap()
        );
        assert_eq!(
            ThresholdExpr {
                aggregation: Aggregation::Percentile(99.9),
                comparison: Comparison::Ge,
                value: 1.5,
            },
            "p(99.9)>=1.5".parse().unwrap()
        );
    }

    #[test]
    fn reject_malformed_expressions() {
        assert_eq!(
            Err(ThresholdParseError::MissingOperator("rate 0.05".to_string())),
            "rate 0.05".parse::<ThresholdExpr>()
        );
        assert_eq!(
            Err(ThresholdParseError::InvalidPercentile("p(150)".to_string())),
            "p(150)<10".parse::<ThresholdExpr>()
        );
        assert_eq!(
            Err(ThresholdParseError::UnknownAggregation("mean".to_string())),
            "mean<10".parse::<ThresholdExpr>()
        );
        assert_eq!(
            Err(ThresholdParseError::InvalidValue("avg<fast".to_string())),
            "avg<fast".parse::<ThresholdExpr>()
        );
        assert_eq!(
            Err(ThresholdParseError::EmptyExpression),
            "  ".parse::<ThresholdExpr>()
        );
    }

    #[test]
    fn reject_aggregation_for_wrong_metric_kind() {
        let err = Threshold::parse("request_failed", "p(95)<10").unwrap_err();

        assert!(matches!(err, ThresholdParseError::NotApplicable { .. }));
        assert!(Threshold::parse("request_duration", "rate<10").is_err());
        assert!(Threshold::parse("iterations", "count>10").is_ok());
    }

    #[test]
    fn failure_rate_below_five_percent() {
        let threshold = Threshold::parse("iteration_failed", "rate<0.05").unwrap();

        assert_eq!(
            Verdict::Passed { observed: 0.03 },
            threshold.evaluate(&snapshot_with_failures(100, 3))
        );
        assert_eq!(
            Verdict::Failed { observed: 0.06 },
            threshold.evaluate(&snapshot_with_failures(100, 6))
        );
    }

    #[test]
    fn zero_samples_are_inconclusive() {
        let snapshot = MetricsAggregator::new().finalize();

        for (metric, expr) in [
            ("iteration_failed", "rate<0.05"),
            ("http_req_duration", "p(95)<1000"),
            ("iterations", "count>0"),
            ("checks{schema created}", "rate>0.99"),
        ] {
            let verdict = Threshold::parse(metric, expr).unwrap().evaluate(&snapshot);
            assert!(
                matches!(verdict, Verdict::Inconclusive { .. }),
                "{metric} {expr} gave {verdict:?}"
            );
        }

        let report = evaluate_thresholds(
            &snapshot,
            &[Threshold::parse("iteration_failed", "rate<0.05").unwrap()],
        );
        assert!(!report.overall_passed());
        assert_eq!(1, report.inconclusive());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let aggregator = MetricsAggregator::new();
        for i in 0..50u64 {
            aggregator.record(
                IterationOutcome::succeeded(Duration::from_millis(20)).with_operations(vec![
                    OperationRecord::completed(
                        "select",
                        Duration::from_millis(i * 10),
                        i % 10 == 0,
                    ),
                ]),
            );
        }
        let snapshot = aggregator.finalize();

        let thresholds = vec![
            Threshold::parse("http_req_failed", "rate<0.05").unwrap(),
            Threshold::parse("http_req_duration", "p(95)<1000").unwrap(),
            Threshold::parse("request_duration{select}", "avg<300").unwrap(),
        ];

        let first = evaluate_thresholds(&snapshot, &thresholds);
        let second = evaluate_thresholds(&snapshot, &thresholds);
        assert_eq!(first, second);

        assert_eq!(1, first.breached());
        assert!(!first.overall_passed());
        assert_eq!(
            MetricKey::new(MetricName::RequestFailed),
            first.verdicts[0].threshold.metric
        );
        assert!(matches!(first.verdicts[0].verdict, Verdict::Failed { .. }));
        assert!(first.verdicts[1].verdict.is_passed());
        assert!(first.verdicts[2].verdict.is_passed());
    }

    #[test]
    fn empty_report_passes() {
        assert!(ThresholdReport::default().overall_passed());
    }
}
