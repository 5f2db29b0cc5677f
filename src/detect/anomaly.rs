use serde::{Deserialize, Serialize};

use crate::detect::history::TestHistory;
use crate::detect::{Anomaly, AnomalyType, Severity};
use crate::parse::TestStatus;

/// Thresholds for the three detection rules. Every comparison is strict
/// (`>`), so a value sitting exactly on a boundary takes the lower grade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionThresholds {
    /// Groups with fewer executions are skipped.
    pub min_executions: usize,
    /// Most recent executions per test loaded from storage.
    pub history_window: usize,

    pub flaky_rate: f64,
    pub flaky_medium: f64,
    pub flaky_high: f64,

    pub slow_ms: f64,
    pub slow_medium_ms: f64,
    pub slow_high_ms: f64,

    pub failure_rate: f64,
    pub failure_medium: f64,
    pub failure_high: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            min_executions: 3,
            history_window: 50,
            flaky_rate: 0.2,
            flaky_medium: 0.3,
            flaky_high: 0.5,
            slow_ms: 5_000.0,
            slow_medium_ms: 7_500.0,
            slow_high_ms: 10_000.0,
            failure_rate: 0.5,
            failure_medium: 0.65,
            failure_high: 0.8,
        }
    }
}

/// Numeric summary backing a detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnomalyDetails {
    Flaky {
        pass_rate: f64,
        fail_rate: f64,
        total_runs: usize,
    },
    Slow {
        average_duration: f64,
        max_duration: f64,
    },
    FrequentlyFailing {
        failure_rate: f64,
        total_runs: usize,
        recent_failures: usize,
    },
}

/// An anomaly candidate produced by a detection pass, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedAnomaly {
    pub project_id: String,
    pub test_id: String,
    pub test_name: String,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub details: AnomalyDetails,
}

impl DetectedAnomaly {
    /// Turn the candidate into a fresh, unresolved anomaly record.
    pub fn into_anomaly(self, detected_at: chrono::DateTime<chrono::Utc>) -> Anomaly {
        Anomaly {
            id: uuid::Uuid::new_v4(),
            details: serde_json::to_value(&self.details).unwrap_or_default(),
            project_id: self.project_id,
            test_id: self.test_id,
            test_name: self.test_name,
            anomaly_type: self.anomaly_type,
            severity: self.severity,
            insights: None,
            resolved: false,
            detected_at,
            resolved_at: None,
        }
    }
}

/// Run every rule over every test group.
///
/// The three rules are independent: one group can raise zero, one, two or
/// all three anomaly types.
pub fn detect(
    project_id: &str,
    histories: &[TestHistory],
    thresholds: &DetectionThresholds,
) -> Vec<DetectedAnomaly> {
    let mut found = Vec::new();
    for history in histories {
        if history.len() < thresholds.min_executions {
            continue;
        }
        let checks = [
            check_flaky(history, thresholds),
            check_slow(history, thresholds),
            check_frequently_failing(history, thresholds),
        ];
        for (anomaly_type, severity, details) in checks.into_iter().flatten() {
            found.push(DetectedAnomaly {
                project_id: project_id.to_string(),
                test_id: history.test_id.clone(),
                test_name: history.test_name.clone(),
                anomaly_type,
                severity,
                details,
            });
        }
    }
    found
}

type Finding = (AnomalyType, Severity, AnomalyDetails);

fn check_flaky(history: &TestHistory, t: &DetectionThresholds) -> Option<Finding> {
    let n = history.len() as f64;
    let passed = history.count(TestStatus::Passed);
    let failed = history.count(TestStatus::Failed);
    if passed == 0 || failed == 0 {
        return None;
    }

    let rate = passed.min(failed) as f64 / n;
    if rate <= t.flaky_rate {
        return None;
    }
    Some((
        AnomalyType::Flaky,
        grade(rate, t.flaky_medium, t.flaky_high),
        AnomalyDetails::Flaky {
            pass_rate: passed as f64 / n,
            fail_rate: failed as f64 / n,
            total_runs: history.len(),
        },
    ))
}

fn check_slow(history: &TestHistory, t: &DetectionThresholds) -> Option<Finding> {
    let average = history.mean_duration();
    if average <= t.slow_ms {
        return None;
    }
    Some((
        AnomalyType::Slow,
        grade(average, t.slow_medium_ms, t.slow_high_ms),
        AnomalyDetails::Slow {
            average_duration: average,
            max_duration: history.max_duration(),
        },
    ))
}

fn check_frequently_failing(history: &TestHistory, t: &DetectionThresholds) -> Option<Finding> {
    let failed = history.count(TestStatus::Failed);
    if failed == 0 {
        return None;
    }
    let rate = failed as f64 / history.len() as f64;
    if rate <= t.failure_rate {
        return None;
    }
    Some((
        AnomalyType::FrequentlyFailing,
        grade(rate, t.failure_medium, t.failure_high),
        AnomalyDetails::FrequentlyFailing {
            failure_rate: rate,
            total_runs: history.len(),
            recent_failures: failed,
        },
    ))
}

fn grade(value: f64, medium: f64, high: f64) -> Severity {
    if value > high {
        Severity::High
    } else if value > medium {
        Severity::Medium
    } else {
        Severity::Low
    }
}
