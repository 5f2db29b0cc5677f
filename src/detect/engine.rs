use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::detect::anomaly::{detect, DetectedAnomaly, DetectionThresholds};
use crate::detect::history::TestHistory;
use crate::detect::store::{AnomalyStore, InsertOutcome, SqliteAnomalyStore};
use crate::detect::{Anomaly, AnomalyFilter};
use crate::ingest::Ingestor;
use crate::storage::Pool;

/// Outcome of one detection pass.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    /// Every candidate the rules produced, persisted or not.
    pub detected: Vec<DetectedAnomaly>,
    /// Anomalies newly written by this pass.
    pub inserted: Vec<Anomaly>,
    /// Candidates skipped because the same issue is still open.
    pub already_open: usize,
}

/// Runs detection over execution history and owns the anomaly lifecycle.
#[derive(Clone)]
pub struct AnomalyEngine {
    store: Arc<dyn AnomalyStore>,
    thresholds: DetectionThresholds,
}

impl AnomalyEngine {
    pub fn new(store: Arc<dyn AnomalyStore>, thresholds: DetectionThresholds) -> Self {
        Self { store, thresholds }
    }

    /// Engine persisting to the SQLite `anomalies` table.
    pub fn with_pool(pool: Pool, thresholds: DetectionThresholds) -> Self {
        Self::new(Arc::new(SqliteAnomalyStore::new(pool)), thresholds)
    }

    pub fn thresholds(&self) -> &DetectionThresholds {
        &self.thresholds
    }

    /// Detect anomalies in `history` and persist the ones not already open.
    ///
    /// Safe to repeat with the same history: a second pass reports the same
    /// candidates but writes nothing new.
    pub async fn run_detection(&self, project_id: &str, history: Vec<TestHistory>) -> Result<DetectionReport> {
        info!(project = %project_id, tests = history.len(), "Running anomaly detection");

        let store = self.store.clone();
        let thresholds = self.thresholds.clone();
        let project_id = project_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<DetectionReport> {
            let detected = detect(&project_id, &history, &thresholds);
            let now = chrono::Utc::now();

            let mut inserted = Vec::new();
            let mut already_open = 0;
            for candidate in &detected {
                let anomaly = candidate.clone().into_anomaly(now);
                match store.insert_if_absent(&anomaly)? {
                    InsertOutcome::Inserted => {
                        warn!(
                            project = %project_id,
                            test = %anomaly.test_id,
                            kind = %anomaly.anomaly_type,
                            severity = anomaly.severity.as_str(),
                            "New test anomaly"
                        );
                        inserted.push(anomaly);
                    }
                    InsertOutcome::AlreadyOpen => {
                        debug!(test = %anomaly.test_id, kind = %anomaly.anomaly_type, "Anomaly already open");
                        already_open += 1;
                    }
                }
            }

            info!(
                project = %project_id,
                detected = detected.len(),
                inserted = inserted.len(),
                already_open,
                "Anomaly detection complete"
            );
            Ok(DetectionReport {
                detected,
                inserted,
                already_open,
            })
        })
        .await?
    }

    /// Load the project's stored history and run detection over it.
    pub async fn scan_project(&self, ingestor: &Ingestor, project_id: &str) -> Result<DetectionReport> {
        let history = ingestor
            .load_history(project_id, self.thresholds.history_window)
            .await?;
        self.run_detection(project_id, history).await
    }

    pub async fn resolve_anomaly(&self, id: Uuid) -> Result<Anomaly> {
        let store = self.store.clone();
        let anomaly = tokio::task::spawn_blocking(move || store.resolve(id, chrono::Utc::now())).await??;
        info!(%id, test = %anomaly.test_id, "Anomaly resolved");
        Ok(anomaly)
    }

    pub async fn attach_insights(&self, id: Uuid, insights: String) -> Result<Anomaly> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.attach_insights(id, &insights)).await?
    }

    pub async fn list_anomalies(&self, filter: AnomalyFilter) -> Result<Vec<Anomaly>> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.list(&filter)).await?
    }
}
