//! CI log parsing -- job logs into steps, step logs into test outcomes.
//!
//! Everything here is pure text processing: no I/O, no shared state, and
//! no failure mode. Unrecognised lines are simply not classified.

pub mod duration;
pub mod outcomes;
pub mod steps;

use serde::{Deserialize, Serialize};

pub use duration::parse_duration;
pub use outcomes::extract_test_outcomes;
pub use steps::split_into_steps;

/// Compile a regex once and return a static reference.
macro_rules! static_regex {
    ($pat:expr) => {{
        static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| regex::Regex::new($pat).expect("static regex is valid"))
    }};
}
pub(crate) use static_regex;

/// Outcome of a single test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for TestStatus {
    type Err = crate::detect::DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "passed" | "pass" => Ok(TestStatus::Passed),
            "failed" | "fail" => Ok(TestStatus::Failed),
            "skipped" | "skip" => Ok(TestStatus::Skipped),
            _ => Err(crate::detect::DetectError::UnknownValue {
                kind: "test status",
                value: s.to_string(),
            }),
        }
    }
}

/// A test result extracted from log text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test_name: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub status: TestStatus,
    pub error: Option<String>,
    pub error_details: Option<String>,
    pub duration_ms: Option<f64>,
}

impl TestOutcome {
    /// Aggregation key: `file::name` when the file is known, else the name.
    pub fn identity(&self) -> String {
        test_identity(self.file.as_deref(), &self.test_name)
    }
}

/// Build the identity key used to group executions of the same test.
pub fn test_identity(file: Option<&str>, test_name: &str) -> String {
    match file {
        Some(file) => format!("{file}::{test_name}"),
        None => test_name.to_string(),
    }
}

/// One named segment of a CI job log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStep {
    pub name: String,
    pub step_number: u32,
    pub log_text: String,
}

/// A step together with the outcomes parsed from its text.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedStep {
    #[serde(flatten)]
    pub step: LogStep,
    pub outcomes: Vec<TestOutcome>,
}

/// Split a raw job log into steps.
pub fn parse_job_log(raw_log: &str) -> Vec<LogStep> {
    split_into_steps(raw_log)
}

/// Extract test outcomes from one step's log text.
pub fn parse_step_log(log_text: &str) -> Vec<TestOutcome> {
    extract_test_outcomes(log_text)
}

/// Split a job log and parse every step.
pub fn parse_full_log(raw_log: &str) -> Vec<ParsedStep> {
    parse_job_log(raw_log)
        .into_iter()
        .map(|step| {
            let outcomes = parse_step_log(&step.log_text);
            tracing::debug!(
                step = %step.name,
                number = step.step_number,
                outcomes = outcomes.len(),
                "parsed step"
            );
            ParsedStep { step, outcomes }
        })
        .collect()
}
