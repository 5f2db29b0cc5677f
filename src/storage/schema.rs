//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS test_runs (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            framework TEXT NOT NULL,
            branch TEXT,
            commit_sha TEXT,
            total INTEGER NOT NULL,
            passed INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            duration_ms REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS test_executions (
            id INTEGER PRIMARY KEY,
            run_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            test_id TEXT NOT NULL,
            test_name TEXT NOT NULL,
            file TEXT,
            line INTEGER,
            status TEXT NOT NULL,
            duration_ms REAL NOT NULL DEFAULT 0,
            error TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (run_id) REFERENCES test_runs(id)
        );

        CREATE TABLE IF NOT EXISTS anomalies (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            test_id TEXT NOT NULL,
            test_name TEXT NOT NULL,
            anomaly_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            details_json TEXT NOT NULL,
            insights TEXT,
            resolved INTEGER NOT NULL DEFAULT 0,
            detected_at TEXT NOT NULL,
            resolved_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_runs_project ON test_runs(project_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_executions_test ON test_executions(project_id, test_id, id);
        CREATE INDEX IF NOT EXISTS idx_anomalies_project ON anomalies(project_id, detected_at);
        CREATE INDEX IF NOT EXISTS idx_anomalies_type ON anomalies(anomaly_type, detected_at);

        -- At most one unresolved anomaly per (project, test, type).
        CREATE UNIQUE INDEX IF NOT EXISTS idx_anomalies_open
            ON anomalies(project_id, test_id, anomaly_type) WHERE resolved = 0;

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
