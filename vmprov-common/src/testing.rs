//! Logging for the provisioning test suites.
//!
//! [`init_global_test_logging`] routes every tracing event of the engine to
//! `target/test-logs/provisioning.jsonl`. Integration tests install it from
//! a `ctor`:
//!
//! ```ignore
//! #[ctor::ctor]
//! fn setup() {
//!     vmprov_common::testing::init_global_test_logging();
//! }
//! ```
//!
//! [`ScenarioLog`] keeps one file per scenario with its steps and the
//! provisioning result it ended with, so a failed run can be read without
//! the noise of the other tests.

use crate::errors::ProvisioningResult;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Building the worker host, job and scripted cache service.
    Arrange,
    Provision,
    Check,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arrange => "arrange",
            Self::Provision => "provision",
            Self::Check => "check",
        }
    }
}

static INIT: Once = Once::new();

/// Install the suite subscriber once per process.
///
/// `VMPROV_TEST_LOG_LEVEL` sets the level for the vmprov crates (default
/// `debug`), `VMPROV_TEST_LOG_FILE` moves the JSONL file.
pub fn init_global_test_logging() {
    INIT.call_once(|| {
        let level = std::env::var("VMPROV_TEST_LOG_LEVEL").unwrap_or_else(|_| "debug".into());
        let filter = EnvFilter::try_new(format!("vmprov_common={level},vmprov_wkr={level}"))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let suite_log = std::env::var_os("VMPROV_TEST_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| log_root().join("provisioning.jsonl"));
        let jsonl = create_log_file(&suite_log).map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(Mutex::new(file))
        });
        let console = tracing_subscriber::fmt::layer().with_test_writer().compact();

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(jsonl)
            .with(console)
            .try_init();
    });
}

fn log_root() -> PathBuf {
    match std::env::var_os("CARGO_TARGET_DIR") {
        Some(target) => PathBuf::from(target).join("test-logs"),
        None => Path::new(env!("CARGO_MANIFEST_DIR")).join("../target/test-logs"),
    }
}

fn create_log_file(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    File::create(path).ok()
}

/// One line of a scenario log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub at: String,
    pub scenario: String,
    pub step: Step,
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProvisioningResult>,
    pub elapsed_ms: u64,
}

/// Step log of a single provisioning scenario, written to
/// `target/test-logs/scenarios/<scenario>.jsonl`.
pub struct ScenarioLog {
    scenario: String,
    started: Instant,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl ScenarioLog {
    pub fn start(scenario: &str) -> Self {
        let file_name = scenario.replace("::", "-").replace(['/', '\\'], "-");
        let path = log_root()
            .join("scenarios")
            .join(format!("{file_name}.jsonl"));
        let log = Self {
            scenario: scenario.to_string(),
            started: Instant::now(),
            file: Mutex::new(create_log_file(&path)),
            path,
        };
        log.step(Step::Arrange, "started");
        log
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn step(&self, step: Step, note: impl Into<String>) {
        self.append(step, note.into(), None);
    }

    /// Record what provisioning returned.
    pub fn outcome(&self, result: &ProvisioningResult) {
        let note = match (&result.code, &result.error) {
            (Some(code), Some(error)) => format!("failed with {code}: {error}"),
            (None, Some(error)) => format!("failed: {error}"),
            _ => "provisioned".to_string(),
        };
        self.append(Step::Check, note, Some(result.clone()));
    }

    pub fn finish(self) {
        self.step(Step::Check, "finished");
    }

    fn append(&self, step: Step, note: String, result: Option<ProvisioningResult>) {
        let record = ScenarioRecord {
            at: chrono::Utc::now().to_rfc3339(),
            scenario: self.scenario.clone(),
            step,
            note,
            result,
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::debug!(
            scenario = %record.scenario,
            step = record.step.as_str(),
            elapsed_ms = record.elapsed_ms,
            "{}",
            record.note
        );

        let Ok(line) = serde_json::to_string(&record) else {
            return;
        };
        if let Ok(mut file) = self.file.lock()
            && let Some(file) = file.as_mut()
        {
            let _ = writeln!(file, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorCode, ProvisionFailure};

    fn read_records(path: &Path) -> Vec<ScenarioRecord> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_scenario_log_records_steps_and_outcome() {
        init_global_test_logging();
        let log = ScenarioLog::start("testing::scenario_log_records");
        let path = log.path().to_path_buf();
        assert!(path.ends_with("scenarios/testing-scenario_log_records.jsonl"));

        log.step(Step::Provision, "local mode");
        let failure = ProvisionFailure::asset(
            ErrorCode::AssetNotFound,
            "Cannot find ISO asset iso/missing.iso!",
        );
        log.outcome(&failure.into());
        log.finish();

        let records = read_records(&path);
        let steps: Vec<Step> = records.iter().map(|r| r.step).collect();
        assert_eq!(
            steps,
            [Step::Arrange, Step::Provision, Step::Check, Step::Check]
        );
        assert_eq!(
            records[2].note,
            "failed with VP-E041: Cannot find ISO asset iso/missing.iso!"
        );
        assert_eq!(
            records[2].result.as_ref().and_then(|r| r.code.as_deref()),
            Some("VP-E041")
        );
        assert!(records[3].result.is_none());
    }

    #[test]
    fn test_success_outcome_note() {
        let log = ScenarioLog::start("testing::success_outcome_note");
        log.outcome(&ProvisioningResult::success());
        let records = read_records(log.path());
        assert_eq!(records.last().map(|r| r.note.as_str()), Some("provisioned"));
    }
}
