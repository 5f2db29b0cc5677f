//! SQLite storage layer -- schema, queries, migrations.

pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};

use crate::detect::history::{group_history, ExecutionHistoryEntry, TestHistory};
use crate::ingest::{RunSummary, TestRunBatch};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)
        .with_context(|| format!("failed to open database: {path}"))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Open a private in-memory database.
///
/// The pool holds a single connection since every in-memory connection
/// would otherwise see its own empty database.
pub fn open_memory_pool() -> Result<Pool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = R2D2Pool::builder().max_size(1).build(manager)?;

    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Format a timestamp the way every table stores it. Fixed precision keeps
/// lexical order equal to chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid stored timestamp: {s}"))?
        .with_timezone(&Utc))
}

/// Save one test run and all of its executions in a single transaction.
pub fn save_run(
    conn: &mut Connection,
    run_id: &str,
    batch: &TestRunBatch,
    summary: &RunSummary,
    created_at: &DateTime<Utc>,
) -> Result<()> {
    let created_at = format_timestamp(created_at);
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO test_runs
            (id, project_id, framework, branch, commit_sha, total, passed, failed, skipped, duration_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            run_id,
            batch.project_id,
            batch.framework.as_str(),
            batch.branch,
            batch.commit_sha,
            summary.total,
            summary.passed,
            summary.failed,
            summary.skipped,
            summary.duration_ms,
            created_at,
        ],
    )?;

    {
        let mut insert_stmt = tx.prepare(
            "INSERT INTO test_executions
                (run_id, project_id, test_id, test_name, file, line, status, duration_ms, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;

        for result in &batch.results {
            insert_stmt.execute(params![
                run_id,
                batch.project_id,
                result.identity(),
                result.test_name,
                result.file,
                result.line,
                result.status.as_str(),
                result.duration_ms.unwrap_or(0.0),
                result.error,
                created_at,
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// Load execution history for a project, keeping the `window` most recent
/// executions of each test.
pub fn load_history(conn: &Connection, project_id: &str, window: usize) -> Result<Vec<TestHistory>> {
    let mut stmt = conn.prepare(
        "SELECT test_id, test_name, status, duration_ms FROM (
            SELECT test_id, test_name, status, duration_ms, id,
                   ROW_NUMBER() OVER (PARTITION BY test_id ORDER BY id DESC) AS rn
            FROM test_executions
            WHERE project_id = ?1
         )
         WHERE rn <= ?2
         ORDER BY test_id, id",
    )?;

    let rows = stmt.query_map(params![project_id, window as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, f64>(3)?,
        ))
    })?;

    let mut entries = Vec::new();
    for r in rows {
        let (test_id, test_name, status, duration_ms) = r?;
        entries.push(ExecutionHistoryEntry {
            test_id,
            test_name,
            status: status.parse()?,
            duration_ms,
        });
    }

    Ok(group_history(entries))
}
