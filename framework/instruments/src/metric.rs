use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::ThresholdParseError;

/// The shape of a metric, which decides which threshold aggregations apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Rate => write!(f, "rate"),
            MetricKind::Trend => write!(f, "trend"),
        }
    }
}

/// The built-in metrics that the aggregator maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    Iterations,
    IterationFailed,
    IterationDuration,
    Checks,
    Requests,
    RequestFailed,
    RequestDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Iterations => "iterations",
            MetricName::IterationFailed => "iteration_failed",
            MetricName::IterationDuration => "iteration_duration",
            MetricName::Checks => "checks",
            MetricName::Requests => "requests",
            MetricName::RequestFailed => "request_failed",
            MetricName::RequestDuration => "request_duration",
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricName::Iterations | MetricName::Requests => MetricKind::Counter,
            MetricName::IterationFailed | MetricName::Checks | MetricName::RequestFailed => {
                MetricKind::Rate
            }
            MetricName::IterationDuration | MetricName::RequestDuration => MetricKind::Trend,
        }
    }

    /// Check and request metrics can be narrowed to a single check name or operation id.
    pub fn supports_selector(&self) -> bool {
        matches!(
            self,
            MetricName::Checks
                | MetricName::Requests
                | MetricName::RequestFailed
                | MetricName::RequestDuration
        )
    }
}

impl FromStr for MetricName {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iterations" => Ok(MetricName::Iterations),
            "iteration_failed" => Ok(MetricName::IterationFailed),
            "iteration_duration" => Ok(MetricName::IterationDuration),
            "checks" => Ok(MetricName::Checks),
            "requests" | "http_reqs" => Ok(MetricName::Requests),
            "request_failed" | "http_req_failed" => Ok(MetricName::RequestFailed),
            "request_duration" | "http_req_duration" => Ok(MetricName::RequestDuration),
            other => Err(ThresholdParseError::UnknownMetric(other.to_string())),
        }
    }
}

impl Display for MetricName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric name, optionally narrowed with a selector such as `checks{insert succeeded}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub name: MetricName,
    pub selector: Option<String>,
}

impl MetricKey {
    pub fn new(name: MetricName) -> Self {
        Self {
            name,
            selector: None,
        }
    }

    pub fn with_selector(name: MetricName, selector: impl Into<String>) -> Self {
        Self {
            name,
            selector: Some(selector.into()),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.name.kind()
    }
}

impl FromStr for MetricKey {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(open) = s.find('{') else {
            return Ok(MetricKey::new(s.parse()?));
        };

        let selector = s[open + 1..]
            .strip_suffix('}')
            .ok_or_else(|| ThresholdParseError::InvalidSelector(s.to_string()))?
            .trim();
        if selector.is_empty() {
            return Err(ThresholdParseError::InvalidSelector(s.to_string()));
        }

        let name: MetricName = s[..open].trim().parse()?;
        if !name.supports_selector() {
            return Err(ThresholdParseError::SelectorNotSupported(name.to_string()));
        }

        Ok(MetricKey::with_selector(name, selector))
    }
}

impl Display for MetricKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.selector {
            Some(selector) => write!(f, "{}{{{}}}", self.name, selector),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_and_aliased_names() {
        assert_eq!(
            MetricKey::new(MetricName::RequestFailed),
            "http_req_failed".parse().unwrap()
        );
        assert_eq!(
            MetricKey::new(MetricName::IterationDuration),
            " iteration_duration ".parse().unwrap()
        );
    }

    #[test]
    fn parse_selector() {
        let key: MetricKey = "checks{response has result}".parse().unwrap();

        assert_eq!(
            MetricKey::with_selector(MetricName::Checks, "response has result"),
            key
        );
        assert_eq!("checks{response has result}", key.to_string());
    }

    #[test]
    fn reject_selector_on_iteration_metrics() {
        let err = "iterations{x}".parse::<MetricKey>().unwrap_err();

        assert!(matches!(err, ThresholdParseError::SelectorNotSupported(_)));
    }

    #[test]
    fn reject_unknown_metric_and_broken_selector() {
        assert!(matches!(
            "vus".parse::<MetricKey>().unwrap_err(),
            ThresholdParseError::UnknownMetric(_)
        ));
        assert!(matches!(
            "checks{open".parse::<MetricKey>().unwrap_err(),
            ThresholdParseError::InvalidSelector(_)
        ));
    }
}
