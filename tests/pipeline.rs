//! Library-level pipeline: raw job log -> steps -> outcomes -> history -> anomalies.

use std::sync::Arc;

use anyhow::Result;
use testlens::detect::{
    AnomalyEngine, AnomalyFilter, AnomalyType, DetectionThresholds, MemoryAnomalyStore, Severity,
};
use testlens::ingest::{Framework, Ingestor, TestRunBatch};
use testlens::parse::{self, TestStatus};
use testlens::storage;

fn fixture() -> String {
    std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/github_job.log"))
        .expect("fixture present")
}

#[test]
fn test_job_log_steps() {
    let steps = parse::parse_job_log(&fixture());
    let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Run actions/checkout@v4",
            "Run npm ci",
            "Run npx vitest run",
            "Run npx playwright test"
        ]
    );
    assert_eq!(steps[1].log_text, "npm ci\nadded 812 packages in 7s");
}

#[test]
fn test_step_outcomes() {
    let steps = parse::parse_job_log(&fixture());
    let vitest = parse::parse_step_log(&steps[2].log_text);
    let statuses: Vec<TestStatus> = vitest.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![TestStatus::Passed, TestStatus::Passed, TestStatus::Failed, TestStatus::Skipped]
    );
    assert_eq!(
        vitest[2].error.as_deref(),
        Some("AssertionError: expected 90 to be 85\n    at applyDiscount (src/cart.ts:41:11)")
    );
    assert!(vitest[3].error.is_none());

    let playwright = parse::parse_step_log(&steps[3].log_text);
    assert_eq!(playwright.len(), 2);
    assert_eq!(playwright[1].file.as_deref(), Some("e2e/checkout.spec.ts"));
    assert_eq!(playwright[1].line, Some(27));
    assert_eq!(playwright[1].duration_ms, Some(6_000.0));
}

#[test]
fn test_k_group_pairs_give_k_steps() {
    for k in 1..=6u32 {
        let log: String = (1..=k)
            .map(|i| format!("##[group]step {i}\nline {i}\n##[endgroup]\n"))
            .collect();
        let steps = parse::split_into_steps(&log);
        let numbers: Vec<u32> = steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, (1..=k).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_ingest_and_detect_flaky() -> Result<()> {
    let ingestor = Ingestor::new(storage::open_memory_pool()?);
    let engine = AnomalyEngine::new(Arc::new(MemoryAnomalyStore::new()), DetectionThresholds::default());

    // Six passing runs, then four failing ones.
    for i in 0..10 {
        let marker = if i < 6 { "PASS" } else { "FAIL" };
        let log = format!("{marker}  src/sync.test.ts > sync > retries upload (40ms)\n");
        ingestor
            .ingest(TestRunBatch {
                project_id: "web".into(),
                framework: Framework::Integration,
                branch: None,
                commit_sha: None,
                results: Vec::new(),
                raw_logs: vec![log],
            })
            .await?;
    }

    for _ in 0..2 {
        let report = engine.scan_project(&ingestor, "web").await?;
        assert_eq!(report.detected.len(), 1);
        assert_eq!(report.detected[0].anomaly_type, AnomalyType::Flaky);
        assert_eq!(report.detected[0].severity, Severity::Medium);
    }

    let stored = engine
        .list_anomalies(AnomalyFilter {
            project_id: Some("web".into()),
            anomaly_type: Some(AnomalyType::Flaky),
            resolved: Some(false),
        })
        .await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].test_id, "src/sync.test.ts::retries upload");
    assert_eq!(stored[0].details["total_runs"], 10);
    Ok(())
}

#[tokio::test]
async fn test_history_window_limits_detection() -> Result<()> {
    let ingestor = Ingestor::new(storage::open_memory_pool()?);
    let thresholds = DetectionThresholds {
        history_window: 3,
        ..DetectionThresholds::default()
    };
    let engine = AnomalyEngine::with_pool(storage::open_memory_pool()?, thresholds);

    // Old failures fall outside the window once three passes follow.
    for marker in ["FAIL", "FAIL", "FAIL", "PASS", "PASS", "PASS"] {
        ingestor
            .ingest(TestRunBatch {
                project_id: "api".into(),
                framework: Framework::Unit,
                branch: None,
                commit_sha: None,
                results: Vec::new(),
                raw_logs: vec![format!("{marker}  health check")],
            })
            .await?;
    }

    let report = engine.scan_project(&ingestor, "api").await?;
    assert!(report.detected.is_empty());
    Ok(())
}
