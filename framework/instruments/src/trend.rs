use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// One hour, in microseconds. Longer samples are clamped.
const MAX_TRACKABLE_MICROS: u64 = 3_600_000_000;
const SIGNIFICANT_DIGITS: u8 = 3;

/// A latency distribution with microsecond resolution.
#[derive(Debug, Clone)]
pub struct Trend {
    histogram: Histogram<u64>,
}

impl Default for Trend {
    fn default() -> Self {
        Self::new()
    }
}

impl Trend {
    pub fn new() -> Self {
        Self {
            histogram: Histogram::new_with_bounds(1, MAX_TRACKABLE_MICROS, SIGNIFICANT_DIGITS)
                .expect("Histogram bounds are valid"),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.histogram.saturating_record(micros);
    }

    pub fn merge(&mut self, other: &Trend) {
        if let Err(e) = self.histogram.add(&other.histogram) {
            log::warn!("Failed to merge latency distributions: {}", e);
        }
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    pub fn min_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| micros_to_ms(self.histogram.min()))
    }

    pub fn max_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| micros_to_ms(self.histogram.max()))
    }

    pub fn mean_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.histogram.mean() / 1000.0)
    }

    /// The value at the given percentile, `percentile` is in the range `0..=100`.
    pub fn percentile_ms(&self, percentile: f64) -> Option<f64> {
        (!self.is_empty()).then(|| {
            let quantile = (percentile / 100.0).clamp(0.0, 1.0);
            micros_to_ms(self.histogram.value_at_quantile(quantile))
        })
    }

    pub fn median_ms(&self) -> Option<f64> {
        self.percentile_ms(50.0)
    }

    pub fn summary(&self) -> TrendSummary {
        TrendSummary {
            count: self.count(),
            avg_ms: self.mean_ms(),
            min_ms: self.min_ms(),
            med_ms: self.median_ms(),
            max_ms: self.max_ms(),
            p90_ms: self.percentile_ms(90.0),
            p95_ms: self.percentile_ms(95.0),
            p99_ms: self.percentile_ms(99.0),
        }
    }
}

fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}

/// Fixed set of statistics over a [Trend], all values are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub count: u64,
    pub avg_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub med_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub p90_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend_of(millis: impl IntoIterator<Item = u64>) -> Trend {
        let mut trend = Trend::new();
        for ms in millis {
            trend.record(Duration::from_millis(ms));
        }
        trend
    }

    #[test]
    fn empty_trend_has_no_statistics() {
        let summary = Trend::new().summary();

        assert_eq!(0, summary.count);
        assert_eq!(None, summary.avg_ms);
        assert_eq!(None, summary.p95_ms);
    }

    #[test]
    fn percentiles_follow_recorded_values() {
        let trend = trend_of(1..=100);

        let p95 = trend.percentile_ms(95.0).unwrap();
        assert!((94.0..=96.0).contains(&p95), "p95 was {p95}");

        let median = trend.median_ms().unwrap();
        assert!((49.0..=51.0).contains(&median), "median was {median}");

        assert!((trend.min_ms().unwrap() - 1.0).abs() < 0.01);
        assert!((trend.max_ms().unwrap() - 100.0).abs() < 0.1);
    }

    #[test]
    fn merge_combines_samples() {
        let mut left = trend_of([10, 20]);
        let right = trend_of([30, 40, 50]);

        left.merge(&right);

        assert_eq!(5, left.count());
        assert!((left.mean_ms().unwrap() - 30.0).abs() < 0.1);
    }

    #[test]
    fn very_long_samples_are_clamped() {
        let mut trend = Trend::new();
        trend.record(Duration::from_secs(10 * 3600));

        assert_eq!(1, trend.count());
        assert!(trend.max_ms().unwrap() <= 3_600_000.0 * 1.01);
    }
}
