use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use surge_instruments::{MetricKey, Threshold, ThresholdParseError};
use thiserror::Error;

use crate::cli::SurgeScenarioCli;
use crate::ramp::{RampProfile, RunBound, Stage};

pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_RAMP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid duration `{value}`: {reason}")]
    InvalidDuration { value: String, reason: String },
    #[error("Invalid stage `{0}`, expected DURATION:TARGET")]
    InvalidStage(String),
    #[error("Invalid threshold `{0}`, expected METRIC=EXPRESSION")]
    InvalidThresholdArg(String),
    #[error("Invalid threshold for `{metric}`: {source}")]
    Threshold {
        metric: String,
        #[source]
        source: ThresholdParseError,
    },
    #[error("A duration is required to run a constant number of virtual users, unless running as a soak test")]
    MissingDuration,
    #[error("The ramp interval must be greater than zero")]
    ZeroRampInterval,
}

/// Parse a duration given either as integer seconds or in humantime form such as `1m30s`.
pub(crate) fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    humantime::parse_duration(value).map_err(|e| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    pub target: usize,
}

impl From<StageConfig> for Stage {
    fn from(value: StageConfig) -> Self {
        Stage::new(value.duration, value.target)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ThresholdExprs {
    One(String),
    Many(Vec<String>),
}

impl ThresholdExprs {
    fn into_vec(self) -> Vec<String> {
        match self {
            ThresholdExprs::One(expr) => vec![expr],
            ThresholdExprs::Many(exprs) => exprs,
        }
    }
}

/// One layer of run configuration. Scenario defaults, the config file and the command line each
/// produce a layer, and the layers are stacked to resolve the [RunPlan].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanConfig {
    pub target_url: Option<String>,
    pub vus: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdExprs>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub pacing: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub graceful_stop: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub ramp_interval: Option<Duration>,
    pub soak: Option<bool>,
}

impl PlanConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: "inline config".to_string(),
            source,
        })
    }

    /// Stack this layer on top of `lower`, values set in this layer win.
    ///
    /// The workload shape is taken as a whole. Stages in this layer replace the lower `vus`,
    /// `stages` and `duration`, so the run follows its own stages. A constant `vus` in this layer
    /// replaces the lower shape but still inherits a lower `duration`. Thresholds are merged per
    /// metric, with aliases such as `http_req_failed` resolved first.
    pub fn layered_over(self, lower: PlanConfig) -> PlanConfig {
        let (vus, stages, duration) = if !self.stages.is_empty() {
            (self.vus, self.stages, self.duration)
        } else if self.vus.is_some() {
            (self.vus, Vec::new(), self.duration.or(lower.duration))
        } else {
            (lower.vus, lower.stages, self.duration.or(lower.duration))
        };

        let mut thresholds = canonical_thresholds(lower.thresholds);
        thresholds.extend(canonical_thresholds(self.thresholds));

        PlanConfig {
            target_url: self.target_url.or(lower.target_url),
            vus,
            duration,
            stages,
            thresholds,
            pacing: self.pacing.or(lower.pacing),
            graceful_stop: self.graceful_stop.or(lower.graceful_stop),
            ramp_interval: self.ramp_interval.or(lower.ramp_interval),
            soak: self.soak.or(lower.soak),
        }
    }

    pub fn into_plan(self) -> Result<RunPlan, ConfigError> {
        let soak = self.soak.unwrap_or(false);

        let profile = if !self.stages.is_empty() {
            let stages = self.stages.into_iter().map(Stage::from).collect();
            RampProfile::new(self.vus.unwrap_or(0), stages)
        } else {
            let vus = self.vus.unwrap_or(1);
            match (self.duration, soak) {
                (Some(duration), _) => RampProfile::constant(vus, duration),
                (None, true) => RampProfile::constant(vus, Duration::ZERO),
                (None, false) => return Err(ConfigError::MissingDuration),
            }
        };

        let bound = match (soak, self.duration) {
            (true, _) => RunBound::Unbounded,
            (false, Some(duration)) => RunBound::Duration(duration),
            (false, None) => RunBound::Stages,
        };

        let ramp_interval = self.ramp_interval.unwrap_or(DEFAULT_RAMP_INTERVAL);
        if ramp_interval.is_zero() {
            return Err(ConfigError::ZeroRampInterval);
        }

        let mut thresholds = Vec::new();
        for (metric, exprs) in self.thresholds {
            for expr in exprs.into_vec() {
                let threshold =
                    Threshold::parse(&metric, &expr).map_err(|source| ConfigError::Threshold {
                        metric: metric.clone(),
                        source,
                    })?;
                thresholds.push(threshold);
            }
        }

        Ok(RunPlan {
            profile: profile.with_bound(bound),
            thresholds,
            pacing: self.pacing.filter(|p| !p.is_zero()),
            graceful_stop: self.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
            ramp_interval,
            target_url: self.target_url,
        })
    }
}

/// Key thresholds by the canonical metric name. Keys that do not parse are kept as they are and
/// reported when the plan is resolved.
fn canonical_thresholds(
    thresholds: BTreeMap<String, ThresholdExprs>,
) -> BTreeMap<String, ThresholdExprs> {
    thresholds
        .into_iter()
        .map(|(metric, exprs)| match metric.parse::<MetricKey>() {
            Ok(key) => (key.to_string(), exprs),
            Err(_) => (metric, exprs),
        })
        .collect()
}

impl From<&SurgeScenarioCli> for PlanConfig {
    fn from(cli: &SurgeScenarioCli) -> Self {
        let mut thresholds: BTreeMap<String, ThresholdExprs> = BTreeMap::new();
        for (metric, expr) in &cli.thresholds {
            let exprs = thresholds
                .entry(metric.clone())
                .or_insert_with(|| ThresholdExprs::Many(Vec::new()));
            if let ThresholdExprs::Many(exprs) = exprs {
                exprs.push(expr.clone());
            }
        }

        PlanConfig {
            target_url: cli.target_url.clone(),
            vus: cli.vus,
            duration: cli.duration,
            stages: cli.stages.clone(),
            thresholds,
            pacing: cli.pacing,
            graceful_stop: cli.graceful_stop,
            ramp_interval: None,
            soak: cli.soak.then_some(true),
        }
    }
}

/// The resolved, immutable description of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub profile: RampProfile,
    pub thresholds: Vec<Threshold>,
    pub pacing: Option<Duration>,
    pub graceful_stop: Duration,
    pub ramp_interval: Duration,
    pub target_url: Option<String>,
}

struct DurationVisitor;

impl<'de> serde::de::Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a duration as a string (e.g. 30s or 1m30s), or a number of seconds")
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| E::custom("duration must not be negative"))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Duration::try_from_secs_f64(v).map_err(E::custom)
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        humantime::parse_duration(v).map_err(E::custom)
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramp::RampPoint;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn parse_durations() {
        assert_eq!(Duration::from_secs(30), parse_duration("30").unwrap());
        assert_eq!(Duration::from_secs(90), parse_duration("1m30s").unwrap());
        assert_eq!(Duration::from_millis(500), parse_duration("500ms").unwrap());
        assert!(matches!(
            parse_duration("soon"),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
target_url = "http://localhost:8080"
duration = "5m"
pacing = 1
graceful_stop = "10s"
stages = [
  {{ duration = "1m", target = 100 }},
  {{ duration = 30, target = 0 }},
]

[thresholds]
http_req_failed = "rate<0.05"
"request_duration{{select}}" = ["p(95)<1000", "avg<300"]
"#
        )
        .unwrap();

        let config = PlanConfig::load(file.path()).unwrap();

        assert_eq!(Some("http://localhost:8080".to_string()), config.target_url);
        assert_eq!(Some(Duration::from_secs(300)), config.duration);
        assert_eq!(Some(Duration::from_secs(1)), config.pacing);
        assert_eq!(
            vec![
                StageConfig {
                    duration: Duration::from_secs(60),
                    target: 100
                },
                StageConfig {
                    duration: Duration::from_secs(30),
                    target: 0
                },
            ],
            config.stages
        );

        let plan = config.into_plan().unwrap();
        assert_eq!(3, plan.thresholds.len());
        assert_eq!(Duration::from_secs(10), plan.graceful_stop);
        assert_eq!(RunBound::Duration(Duration::from_secs(300)), plan.profile.bound());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = PlanConfig::from_toml_str("virtual_users = 10").unwrap_err();

        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();

        let err = PlanConfig::load(&dir.path().join("missing.toml")).unwrap_err();

        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn command_line_shape_replaces_lower_shape() {
        let defaults = PlanConfig {
            stages: vec![StageConfig {
                duration: Duration::from_secs(60),
                target: 1000,
            }],
            thresholds: BTreeMap::from([(
                "request_failed".to_string(),
                ThresholdExprs::One("rate<0.05".to_string()),
            )]),
            ..Default::default()
        };
        let cli = PlanConfig {
            vus: Some(10),
            duration: Some(Duration::from_secs(30)),
            thresholds: BTreeMap::from([(
                "request_duration".to_string(),
                ThresholdExprs::One("p(95)<500".to_string()),
            )]),
            ..Default::default()
        };

        let plan = cli.layered_over(defaults).into_plan().unwrap();

        assert_eq!(
            RampProfile::constant(10, Duration::from_secs(30))
                .with_bound(RunBound::Duration(Duration::from_secs(30))),
            plan.profile
        );
        assert_eq!(2, plan.thresholds.len());
        assert_eq!(DEFAULT_GRACEFUL_STOP, plan.graceful_stop);
        assert_eq!(DEFAULT_RAMP_INTERVAL, plan.ramp_interval);
    }

    #[test]
    fn command_line_stages_are_not_cut_by_a_lower_duration() {
        let defaults = PlanConfig {
            vus: Some(10),
            duration: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let cli = PlanConfig {
            stages: vec![
                StageConfig {
                    duration: Duration::from_secs(60),
                    target: 100,
                },
                StageConfig {
                    duration: Duration::from_secs(60),
                    target: 0,
                },
            ],
            ..Default::default()
        };

        let plan = cli.layered_over(defaults).into_plan().unwrap();

        assert_eq!(RunBound::Stages, plan.profile.bound());
        assert_eq!(0, plan.profile.start_vus());
        assert_eq!(Some(Duration::from_secs(120)), plan.profile.planned_duration());
        assert_eq!(
            RampPoint::Target(52),
            plan.profile.target_at(Duration::from_secs(31))
        );
    }

    #[test]
    fn command_line_vus_keep_the_lower_duration() {
        let defaults = PlanConfig {
            vus: Some(10),
            duration: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let cli = PlanConfig {
            vus: Some(25),
            ..Default::default()
        };

        let plan = cli.layered_over(defaults).into_plan().unwrap();

        assert_eq!(
            RampProfile::constant(25, Duration::from_secs(30))
                .with_bound(RunBound::Duration(Duration::from_secs(30))),
            plan.profile
        );
    }

    #[test]
    fn threshold_aliases_replace_each_other() {
        let defaults = PlanConfig {
            thresholds: BTreeMap::from([(
                "http_req_failed".to_string(),
                ThresholdExprs::One("rate<0.05".to_string()),
            )]),
            ..Default::default()
        };
        let cli = PlanConfig {
            duration: Some(Duration::from_secs(1)),
            thresholds: BTreeMap::from([(
                "request_failed".to_string(),
                ThresholdExprs::One("rate<0.01".to_string()),
            )]),
            ..Default::default()
        };

        let config = cli.layered_over(defaults);

        assert_eq!(
            BTreeMap::from([(
                "request_failed".to_string(),
                ThresholdExprs::One("rate<0.01".to_string()),
            )]),
            config.thresholds
        );
        assert_eq!(1, config.into_plan().unwrap().thresholds.len());
    }

    #[test]
    fn duration_alone_keeps_lower_stages() {
        let defaults = PlanConfig {
            stages: vec![StageConfig {
                duration: Duration::from_secs(60),
                target: 10,
            }],
            ..Default::default()
        };
        let cli = PlanConfig {
            duration: Some(Duration::from_secs(90)),
            ..Default::default()
        };

        let plan = cli.layered_over(defaults).into_plan().unwrap();

        assert_eq!(1, plan.profile.stages().len());
        assert_eq!(RunBound::Duration(Duration::from_secs(90)), plan.profile.bound());
    }

    #[test]
    fn constant_vus_need_a_duration() {
        let config = PlanConfig {
            vus: Some(5),
            ..Default::default()
        };

        assert!(matches!(
            config.clone().into_plan(),
            Err(ConfigError::MissingDuration)
        ));

        let soak = PlanConfig {
            soak: Some(true),
            ..config
        }
        .into_plan()
        .unwrap();
        assert_eq!(RunBound::Unbounded, soak.profile.bound());
    }

    #[test]
    fn invalid_threshold_names_the_metric() {
        let config = PlanConfig {
            duration: Some(Duration::from_secs(1)),
            thresholds: BTreeMap::from([(
                "request_failed".to_string(),
                ThresholdExprs::One("p(95)<10".to_string()),
            )]),
            ..Default::default()
        };

        let err = config.into_plan().unwrap_err();

        assert!(
            matches!(err, ConfigError::Threshold { ref metric, .. } if metric == "request_failed")
        );
    }
}
