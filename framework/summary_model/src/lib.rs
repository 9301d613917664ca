use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, Read, Write};
use std::path::PathBuf;

/// One stage of the ramp profile a run was configured with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSummary {
    pub duration_ms: u64,
    pub target: usize,
}

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner, or passed on the command line. Unique for each run.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The planned duration of the run, in seconds
    ///
    /// Not set for soak runs, which continue until they are stopped.
    pub run_duration: Option<u64>,
    /// The number of virtual users the ramp profile started from
    pub start_vus: usize,
    /// The configured ramp stages, in order
    pub stages: Vec<StageSummary>,
    /// Whether the final target was held until the run was stopped
    pub soak: bool,
    /// The configured thresholds, as `metric -> expressions`
    pub thresholds: BTreeMap<String, Vec<String>>,
    /// The highest number of virtual users that were live at once
    pub peak_vus: usize,
    pub iterations_completed: u64,
    pub iterations_failed: u64,
    pub iterations_interrupted: u64,
    /// The verdict of each threshold, keyed by the threshold
    pub verdicts: BTreeMap<String, String>,
    /// The setup hook failed and no iterations were run
    pub setup_failed: bool,
    /// The run was stopped before its profile completed
    pub cancelled: bool,
    /// Whether every threshold passed
    pub passed: bool,
    /// Environment variables set for the run
    ///
    /// This won't capture all environment variables. Just the ones that the runner is aware of or
    /// that are included by the scenario itself.
    pub env: HashMap<String, String>,
    /// The version of the Surge runner that was used to run the scenario
    pub surge_version: String,
}

impl RunSummary {
    /// Create a new run summary. Results are filled in once the run is over.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: String,
        scenario_name: String,
        started_at: i64,
        run_duration: Option<u64>,
        start_vus: usize,
        stages: Vec<StageSummary>,
        thresholds: BTreeMap<String, Vec<String>>,
        surge_version: String,
    ) -> Self {
        Self {
            run_id,
            scenario_name,
            started_at,
            run_duration,
            start_vus,
            stages,
            soak: false,
            thresholds,
            peak_vus: 0,
            iterations_completed: 0,
            iterations_failed: 0,
            iterations_interrupted: 0,
            verdicts: BTreeMap::new(),
            setup_failed: false,
            cancelled: false,
            passed: false,
            env: HashMap::with_capacity(0),
            surge_version,
        }
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to uniquely identify the configuration used to run the scenario.
    /// It uses the
    ///     - Scenario name
    ///     - Run duration
    ///     - Ramp profile
    ///     - Thresholds
    ///     - Selected environment variables
    ///     - Surge version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        if let Some(run_duration) = self.run_duration {
            Digest::update(&mut hasher, run_duration.to_le_bytes());
        }
        Digest::update(&mut hasher, self.start_vus.to_le_bytes());
        for stage in &self.stages {
            Digest::update(&mut hasher, stage.duration_ms.to_le_bytes());
            Digest::update(&mut hasher, stage.target.to_le_bytes());
        }
        Digest::update(&mut hasher, [u8::from(self.soak)]);
        for (metric, expressions) in &self.thresholds {
            Digest::update(&mut hasher, metric.as_bytes());
            for expression in expressions {
                Digest::update(&mut hasher, expression.as_bytes());
            }
        }
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.surge_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: RunSummary, path: PathBuf) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all("\n".as_bytes())?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, &run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: PathBuf) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn summary(run_id: &str) -> RunSummary {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "http_req_duration".to_string(),
            vec!["p(95)<1000".to_string()],
        );
        RunSummary::new(
            run_id.to_string(),
            "document_stress".to_string(),
            1_700_000_000,
            Some(360),
            0,
            vec![
                StageSummary {
                    duration_ms: 60_000,
                    target: 100,
                },
                StageSummary {
                    duration_ms: 120_000,
                    target: 0,
                },
            ],
            thresholds,
            "0.1.0".to_string(),
        )
    }

    #[test]
    fn append_then_load_every_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summaries.jsonl");

        let mut first = summary("a");
        first.peak_vus = 100;
        first.passed = true;
        append_run_summary(first.clone(), path.clone()).unwrap();
        append_run_summary(summary("b"), path.clone()).unwrap();

        let runs = load_summary_runs(path).unwrap();
        assert_eq!(vec![first, summary("b")], runs);
    }

    #[test]
    fn fingerprint_ignores_results_and_run_id() {
        let mut finished = summary("a");
        finished.iterations_completed = 1200;
        finished.passed = true;

        assert_eq!(summary("b").fingerprint(), finished.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_configuration() {
        let mut other = summary("a");
        other.stages[0].target = 200;
        assert_ne!(summary("a").fingerprint(), other.fingerprint());

        let mut with_env = summary("a");
        with_env.add_env("RUST_LOG".to_string(), "info".to_string());
        assert_ne!(summary("a").fingerprint(), with_env.fingerprint());
    }
}
