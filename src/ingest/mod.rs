//! Ingestion of test-run batches: structured results plus optional raw CI
//! logs that are parsed into results before storage.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::detect::history::TestHistory;
use crate::parse::{self, test_identity, TestOutcome, TestStatus};
use crate::storage::{self, Pool};

/// Category of test suite a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    #[default]
    Unit,
    Integration,
    E2e,
    Visual,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Unit => "unit",
            Framework::Integration => "integration",
            Framework::E2e => "e2e",
            Framework::Visual => "visual",
        }
    }
}

/// One structured test result as reported by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultInput {
    pub test_name: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    pub status: TestStatus,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TestResultInput {
    pub fn identity(&self) -> String {
        test_identity(self.file.as_deref(), &self.test_name)
    }
}

impl From<TestOutcome> for TestResultInput {
    fn from(o: TestOutcome) -> Self {
        Self {
            test_name: o.test_name,
            file: o.file,
            line: o.line,
            status: o.status,
            duration_ms: o.duration_ms,
            error: o.error_details.or(o.error),
        }
    }
}

/// A batch of results from one test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunBatch {
    pub project_id: String,
    #[serde(default)]
    pub framework: Framework,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub results: Vec<TestResultInput>,
    /// Raw CI job logs to parse into additional results.
    #[serde(default)]
    pub raw_logs: Vec<String>,
}

/// Counts and total duration for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: f64,
}

impl RunSummary {
    pub fn of(results: &[TestResultInput]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for r in results {
            match r.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::Skipped => summary.skipped += 1,
            }
            summary.duration_ms += r.duration_ms.unwrap_or(0.0);
        }
        summary
    }
}

/// What a successful ingest stored.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub run_id: Uuid,
    #[serde(flatten)]
    pub summary: RunSummary,
}

/// Parse any raw logs attached to the batch and fold the resulting
/// outcomes into its structured results.
pub fn expand_raw_logs(batch: &mut TestRunBatch) -> usize {
    let mut parsed = 0;
    for raw in std::mem::take(&mut batch.raw_logs) {
        for step in parse::parse_full_log(&raw) {
            parsed += step.outcomes.len();
            batch.results.extend(step.outcomes.into_iter().map(TestResultInput::from));
        }
    }
    parsed
}

/// Stores test-run batches and serves execution history back to detection.
#[derive(Clone)]
pub struct Ingestor {
    pool: Pool,
}

impl Ingestor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn ingest(&self, mut batch: TestRunBatch) -> Result<IngestReceipt> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<IngestReceipt> {
            let from_logs = expand_raw_logs(&mut batch);
            let summary = RunSummary::of(&batch.results);
            let run_id = Uuid::new_v4();

            let mut conn = pool.get()?;
            storage::save_run(&mut conn, &run_id.to_string(), &batch, &summary, &chrono::Utc::now())?;

            info!(
                project = %batch.project_id,
                %run_id,
                total = summary.total,
                failed = summary.failed,
                from_logs,
                "Ingested test run"
            );
            Ok(IngestReceipt { run_id, summary })
        })
        .await?
    }

    pub async fn load_history(&self, project_id: &str, window: usize) -> Result<Vec<TestHistory>> {
        let pool = self.pool.clone();
        let project_id = project_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<TestHistory>> {
            let conn = pool.get()?;
            storage::load_history(&conn, &project_id, window)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_with_log(log: &str) -> TestRunBatch {
        TestRunBatch {
            project_id: "web".into(),
            framework: Framework::E2e,
            branch: None,
            commit_sha: None,
            results: vec![TestResultInput {
                test_name: "reported directly".into(),
                file: None,
                line: None,
                status: TestStatus::Passed,
                duration_ms: Some(5.0),
                error: None,
            }],
            raw_logs: vec![log.to_string()],
        }
    }

    #[test]
    fn test_expand_raw_logs() {
        let mut batch = batch_with_log(
            "##[group]Run e2e\n✓ logs in (1s)\n× checks out\nError: timeout\n##[endgroup]",
        );
        assert_eq!(expand_raw_logs(&mut batch), 2);
        assert!(batch.raw_logs.is_empty());
        assert_eq!(batch.results.len(), 3);
        assert_eq!(batch.results[2].error.as_deref(), Some("Error: timeout"));

        let summary = RunSummary::of(&batch.results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.duration_ms, 1005.0);
    }

    #[test]
    fn test_batch_json_defaults() {
        let batch: TestRunBatch = serde_json::from_str(
            r#"{"project_id":"web","results":[{"test_name":"a","status":"Failed"}]}"#,
        )
        .unwrap();
        assert_eq!(batch.framework, Framework::Unit);
        assert_eq!(batch.results[0].status, TestStatus::Failed);
        assert!(batch.raw_logs.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_then_load_history() {
        let ingestor = Ingestor::new(storage::open_memory_pool().unwrap());
        for _ in 0..2 {
            let receipt = ingestor
                .ingest(batch_with_log("FAIL  src/x.test.ts > x > breaks\nat run (src/x.ts:1:1)"))
                .await
                .unwrap();
            assert_eq!(receipt.summary.total, 2);
        }

        let history = ingestor.load_history("web", 50).await.unwrap();
        assert_eq!(history.len(), 2);
        let broken = history.iter().find(|h| h.test_name == "breaks").unwrap();
        assert_eq!(broken.test_id, "src/x.test.ts::breaks");
        assert_eq!(broken.len(), 2);
    }
}
