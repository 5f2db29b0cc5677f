//! Test anomaly detection and the anomaly lifecycle.

pub mod anomaly;
pub mod engine;
pub mod history;
pub mod store;

use thiserror::Error;
use uuid::Uuid;

pub use anomaly::{detect, AnomalyDetails, DetectedAnomaly, DetectionThresholds};
pub use engine::{AnomalyEngine, DetectionReport};
pub use history::{group_history, ExecutionHistoryEntry, TestHistory};
pub use store::{AnomalyStore, InsertOutcome, MemoryAnomalyStore, SqliteAnomalyStore};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("anomaly {id} not found")]
    AnomalyNotFound { id: Uuid },
    #[error("unknown {kind}: {value:?}")]
    UnknownValue { kind: &'static str, value: String },
}

/// How urgent a detected anomaly is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// Decode a stored severity. Unknown text falls back to `Low`, the same
    /// lenient policy duration parsing uses.
    pub fn from_stored(s: &str) -> Self {
        match s {
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// Kind of quality signal raised about a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AnomalyType {
    Flaky,
    Slow,
    FrequentlyFailing,
    /// Recorded by downstream producers; no rule in this crate emits it.
    ResourceIntensive,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Flaky => "flaky",
            AnomalyType::Slow => "slow",
            AnomalyType::FrequentlyFailing => "frequently_failing",
            AnomalyType::ResourceIntensive => "resource_intensive",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for AnomalyType {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "flaky" => Ok(AnomalyType::Flaky),
            "slow" => Ok(AnomalyType::Slow),
            "frequently_failing" | "frequentlyfailing" => Ok(AnomalyType::FrequentlyFailing),
            "resource_intensive" | "resourceintensive" => Ok(AnomalyType::ResourceIntensive),
            _ => Err(DetectError::UnknownValue {
                kind: "anomaly type",
                value: s.to_string(),
            }),
        }
    }
}

/// A persisted anomaly with its resolution lifecycle.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Anomaly {
    pub id: Uuid,
    pub project_id: String,
    pub test_id: String,
    pub test_name: String,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub insights: Option<String>,
    pub resolved: bool,
    pub detected_at: chrono::DateTime<chrono::Utc>,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Anomaly {
    /// Key under which at most one unresolved anomaly may exist.
    pub fn open_key(&self) -> (&str, &str, AnomalyType) {
        (&self.project_id, &self.test_id, self.anomaly_type)
    }
}

/// Conjunctive filter for anomaly listings. `None` fields match everything.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AnomalyFilter {
    pub project_id: Option<String>,
    pub anomaly_type: Option<AnomalyType>,
    pub resolved: Option<bool>,
}

impl AnomalyFilter {
    pub fn matches(&self, anomaly: &Anomaly) -> bool {
        self.project_id.as_deref().map_or(true, |p| p == anomaly.project_id)
            && self.anomaly_type.map_or(true, |t| t == anomaly.anomaly_type)
            && self.resolved.map_or(true, |r| r == anomaly.resolved)
    }
}
