use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{parse_duration, ConfigError, StageConfig};

#[derive(Parser, Debug, Clone, Default)]
#[command(about, long_about = None)]
pub struct SurgeScenarioCli {
    /// The base URL of the service to put under load
    #[clap(short, long)]
    pub target_url: Option<String>,

    /// The number of virtual users to run at a constant rate.
    ///
    /// When combined with `--stage` this is the number of virtual users the first stage ramps from.
    #[clap(long)]
    pub vus: Option<usize>,

    /// How long to run for, for example `30s`, `5m` or `90`.
    ///
    /// With a staged profile this overrides the sum of the stage durations. If it is longer the
    /// final stage target is held, if it is shorter the profile is cut.
    #[clap(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Add a ramp stage in the format `duration:target`. For example `--stage=1m:100`.
    ///
    /// Stages run in the order given, each ramping linearly from the previous target to its own.
    /// Use the flag multiple times to define a profile, for example
    /// `--stage=1m:100 --stage=2m:100 --stage=30s:0`.
    #[clap(long = "stage", value_parser = parse_stage)]
    pub stages: Vec<StageConfig>,

    /// Add a pass/fail threshold in the format `metric=expression`. For example
    /// `--threshold='http_req_duration=p(95)<1000'`.
    ///
    /// Thresholds given here replace any defined for the same metric by the scenario or config file.
    #[clap(long = "threshold", value_parser = parse_threshold)]
    pub thresholds: Vec<(String, String)>,

    /// Pause each virtual user for this long between iterations
    #[clap(long, value_parser = parse_duration)]
    pub pacing: Option<Duration>,

    /// How long to wait for in-flight iterations to finish at the end of the run before they are
    /// interrupted. Defaults to 30s.
    #[clap(long, value_parser = parse_duration)]
    pub graceful_stop: Option<Duration>,

    /// Path to a TOML file with run configuration.
    ///
    /// Values on the command line take precedence over the file, which takes precedence over the
    /// defaults set by the scenario.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Run this test as a soak test, holding the final target until stopped
    #[clap(long, default_value = "false")]
    pub soak: bool,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// The ID of this run, a random ID is generated if one is not given
    #[clap(long)]
    pub run_id: Option<String>,

    /// Append a JSON summary of the run to this file
    #[clap(long)]
    pub summary_file: Option<PathBuf>,
}

fn parse_stage(s: &str) -> Result<StageConfig, ConfigError> {
    let (duration, target) = s
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidStage(s.to_string()))?;

    let target = target
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidStage(s.to_string()))?;

    Ok(StageConfig {
        duration: parse_duration(duration.trim())?,
        target,
    })
}

fn parse_threshold(s: &str) -> Result<(String, String), ConfigError> {
    // A selector may contain `=` so only look after it.
    let search_from = s.find('}').map(|i| i + 1).unwrap_or(0);
    let split = s[search_from..]
        .find('=')
        .map(|i| i + search_from)
        .ok_or_else(|| ConfigError::InvalidThresholdArg(s.to_string()))?;

    let metric = s[..split].trim();
    let expression = s[split + 1..].trim();
    if metric.is_empty() || expression.is_empty() {
        return Err(ConfigError::InvalidThresholdArg(s.to_string()));
    }

    Ok((metric.to_string(), expression.to_string()))
}
