//! testlens -- test observability core.
//!
//! This crate parses raw CI logs into per-test outcomes, stores test-run
//! history, and detects flaky, slow and frequently failing tests.

pub mod config;
pub mod detect;
pub mod ingest;
pub mod parse;
pub mod storage;

pub use parse::{parse_job_log, parse_step_log};

use anyhow::Result;

/// Everything the CLI needs, wired from one config.
pub struct App {
    pub ingestor: ingest::Ingestor,
    pub engine: detect::AnomalyEngine,
}

impl App {
    /// Open the database at `db_path` and build the ingestor and engine.
    pub fn open(db_path: &str, thresholds: detect::DetectionThresholds) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(%db_path, "Initializing database");
        let pool = storage::open_pool(db_path)?;
        Ok(Self {
            ingestor: ingest::Ingestor::new(pool.clone()),
            engine: detect::AnomalyEngine::with_pool(pool, thresholds),
        })
    }
}
