//! Anomaly persistence.
//!
//! Both stores keep the open-anomaly invariant atomically: the SQLite store
//! through a partial unique index, the memory store by checking and
//! inserting under one lock.

use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Value, OptionalExtension};
use uuid::Uuid;

use crate::detect::{Anomaly, AnomalyFilter, DetectError, Severity};
use crate::storage::{format_timestamp, parse_timestamp, Pool};

/// Result of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An unresolved anomaly with the same key already exists; nothing was written.
    AlreadyOpen,
}

pub trait AnomalyStore: Send + Sync {
    /// Insert unless an unresolved anomaly with the same
    /// (project, test, type) exists.
    fn insert_if_absent(&self, anomaly: &Anomaly) -> Result<InsertOutcome>;

    /// Mark an anomaly resolved. Resolving twice keeps the first timestamp.
    fn resolve(&self, id: Uuid, at: DateTime<Utc>) -> Result<Anomaly>;

    fn attach_insights(&self, id: Uuid, insights: &str) -> Result<Anomaly>;

    /// Matching anomalies, newest first.
    fn list(&self, filter: &AnomalyFilter) -> Result<Vec<Anomaly>>;
}

/// In-process store, for tests and embedding without a database.
#[derive(Default)]
pub struct MemoryAnomalyStore {
    anomalies: Mutex<Vec<Anomaly>>,
}

impl MemoryAnomalyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_anomaly(&self, id: Uuid, f: impl FnOnce(&mut Anomaly)) -> Result<Anomaly> {
        let mut anomalies = self.anomalies.lock().map_err(|_| anyhow!("anomaly store lock poisoned"))?;
        let anomaly = anomalies
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(DetectError::AnomalyNotFound { id })?;
        f(anomaly);
        Ok(anomaly.clone())
    }
}

impl AnomalyStore for MemoryAnomalyStore {
    fn insert_if_absent(&self, anomaly: &Anomaly) -> Result<InsertOutcome> {
        let mut anomalies = self.anomalies.lock().map_err(|_| anyhow!("anomaly store lock poisoned"))?;
        if anomalies.iter().any(|a| a.id == anomaly.id) {
            bail!("anomaly {} already stored", anomaly.id);
        }
        let key = anomaly.open_key();
        if anomalies.iter().any(|a| !a.resolved && a.open_key() == key) {
            return Ok(InsertOutcome::AlreadyOpen);
        }
        anomalies.push(anomaly.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn resolve(&self, id: Uuid, at: DateTime<Utc>) -> Result<Anomaly> {
        self.with_anomaly(id, |a| {
            if !a.resolved {
                a.resolved = true;
                a.resolved_at = Some(at);
            }
        })
    }

    fn attach_insights(&self, id: Uuid, insights: &str) -> Result<Anomaly> {
        self.with_anomaly(id, |a| a.insights = Some(insights.to_string()))
    }

    fn list(&self, filter: &AnomalyFilter) -> Result<Vec<Anomaly>> {
        let anomalies = self.anomalies.lock().map_err(|_| anyhow!("anomaly store lock poisoned"))?;
        // Reverse first so the stable sort keeps later inserts ahead on ties.
        let mut matching: Vec<Anomaly> = anomalies
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(matching)
    }
}

/// Store backed by the `anomalies` table.
#[derive(Clone)]
pub struct SqliteAnomalyStore {
    pool: Pool,
}

const SELECT_ANOMALY: &str = "SELECT id, project_id, test_id, test_name, anomaly_type, severity,
        details_json, insights, resolved, detected_at, resolved_at
    FROM anomalies";

impl SqliteAnomalyStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn get(&self, conn: &rusqlite::Connection, id: Uuid) -> Result<Anomaly> {
        let row = conn
            .query_row(
                &format!("{SELECT_ANOMALY} WHERE id = ?1"),
                params![id.to_string()],
                read_row,
            )
            .optional()?;
        row.ok_or(DetectError::AnomalyNotFound { id })?.into_anomaly()
    }
}

/// Raw column values of one `anomalies` row.
struct AnomalyRow {
    id: String,
    project_id: String,
    test_id: String,
    test_name: String,
    anomaly_type: String,
    severity: String,
    details_json: String,
    insights: Option<String>,
    resolved: bool,
    detected_at: String,
    resolved_at: Option<String>,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnomalyRow> {
    Ok(AnomalyRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        test_id: row.get(2)?,
        test_name: row.get(3)?,
        anomaly_type: row.get(4)?,
        severity: row.get(5)?,
        details_json: row.get(6)?,
        insights: row.get(7)?,
        resolved: row.get(8)?,
        detected_at: row.get(9)?,
        resolved_at: row.get(10)?,
    })
}

impl AnomalyRow {
    fn into_anomaly(self) -> Result<Anomaly> {
        Ok(Anomaly {
            id: Uuid::parse_str(&self.id)?,
            project_id: self.project_id,
            test_id: self.test_id,
            test_name: self.test_name,
            anomaly_type: self.anomaly_type.parse()?,
            severity: Severity::from_stored(&self.severity),
            details: serde_json::from_str(&self.details_json).unwrap_or_default(),
            insights: self.insights,
            resolved: self.resolved,
            detected_at: parse_timestamp(&self.detected_at)?,
            resolved_at: self.resolved_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

impl AnomalyStore for SqliteAnomalyStore {
    fn insert_if_absent(&self, anomaly: &Anomaly) -> Result<InsertOutcome> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "INSERT INTO anomalies
                (id, project_id, test_id, test_name, anomaly_type, severity, details_json,
                 insights, resolved, detected_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (project_id, test_id, anomaly_type) WHERE resolved = 0 DO NOTHING",
            params![
                anomaly.id.to_string(),
                anomaly.project_id,
                anomaly.test_id,
                anomaly.test_name,
                anomaly.anomaly_type.as_str(),
                anomaly.severity.as_str(),
                serde_json::to_string(&anomaly.details)?,
                anomaly.insights,
                anomaly.resolved,
                format_timestamp(&anomaly.detected_at),
                anomaly.resolved_at.as_ref().map(format_timestamp),
            ],
        )?;

        Ok(if changed == 0 {
            InsertOutcome::AlreadyOpen
        } else {
            InsertOutcome::Inserted
        })
    }

    fn resolve(&self, id: Uuid, at: DateTime<Utc>) -> Result<Anomaly> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE anomalies SET resolved = 1, resolved_at = ?2 WHERE id = ?1 AND resolved = 0",
            params![id.to_string(), format_timestamp(&at)],
        )?;
        self.get(&conn, id)
    }

    fn attach_insights(&self, id: Uuid, insights: &str) -> Result<Anomaly> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE anomalies SET insights = ?2 WHERE id = ?1",
            params![id.to_string(), insights],
        )?;
        self.get(&conn, id)
    }

    fn list(&self, filter: &AnomalyFilter) -> Result<Vec<Anomaly>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(project_id) = &filter.project_id {
            values.push(Value::Text(project_id.clone()));
            clauses.push(format!("project_id = ?{}", values.len()));
        }
        if let Some(anomaly_type) = filter.anomaly_type {
            values.push(Value::Text(anomaly_type.as_str().to_string()));
            clauses.push(format!("anomaly_type = ?{}", values.len()));
        }
        if let Some(resolved) = filter.resolved {
            values.push(Value::Integer(i64::from(resolved)));
            clauses.push(format!("resolved = ?{}", values.len()));
        }

        let mut sql = SELECT_ANOMALY.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY detected_at DESC, rowid DESC");

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), read_row)?;

        let mut anomalies: Vec<Anomaly> = Vec::new();
        for r in rows {
            anomalies.push(r?.into_anomaly()?);
        }
        Ok(anomalies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::AnomalyType;
    use crate::storage::open_memory_pool;

    fn anomaly(test_id: &str, anomaly_type: AnomalyType, minutes_ago: i64) -> Anomaly {
        Anomaly {
            id: Uuid::new_v4(),
            project_id: "web".into(),
            test_id: test_id.into(),
            test_name: test_id.into(),
            anomaly_type,
            severity: Severity::Medium,
            details: serde_json::json!({ "total_runs": 10 }),
            insights: None,
            resolved: false,
            detected_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
            resolved_at: None,
        }
    }

    fn stores() -> Vec<Box<dyn AnomalyStore>> {
        vec![
            Box::new(MemoryAnomalyStore::new()),
            Box::new(SqliteAnomalyStore::new(open_memory_pool().unwrap())),
        ]
    }

    #[test]
    fn test_dedup_until_resolved() {
        for store in stores() {
            let first = anomaly("a", AnomalyType::Flaky, 0);
            assert_eq!(store.insert_if_absent(&first).unwrap(), InsertOutcome::Inserted);
            assert_eq!(
                store.insert_if_absent(&anomaly("a", AnomalyType::Flaky, 0)).unwrap(),
                InsertOutcome::AlreadyOpen
            );
            // Different type for the same test is its own key.
            assert_eq!(
                store.insert_if_absent(&anomaly("a", AnomalyType::Slow, 0)).unwrap(),
                InsertOutcome::Inserted
            );

            let resolved = store.resolve(first.id, Utc::now()).unwrap();
            assert!(resolved.resolved);
            assert!(resolved.resolved_at.is_some());

            assert_eq!(
                store.insert_if_absent(&anomaly("a", AnomalyType::Flaky, 0)).unwrap(),
                InsertOutcome::Inserted
            );
            assert_eq!(store.list(&AnomalyFilter::default()).unwrap().len(), 3);
        }
    }

    #[test]
    fn test_duplicate_id_is_an_error() {
        for store in stores() {
            let a = anomaly("a", AnomalyType::Flaky, 0);
            store.insert_if_absent(&a).unwrap();
            store.resolve(a.id, Utc::now()).unwrap();
            // Same id with no open anomaly on its key must not read as AlreadyOpen.
            assert!(store.insert_if_absent(&a).is_err());
            assert_eq!(store.list(&AnomalyFilter::default()).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_resolve_twice_keeps_first_timestamp() {
        for store in stores() {
            let a = anomaly("a", AnomalyType::Slow, 0);
            store.insert_if_absent(&a).unwrap();
            let first = store.resolve(a.id, Utc::now() - chrono::Duration::hours(1)).unwrap();
            let second = store.resolve(a.id, Utc::now()).unwrap();
            assert_eq!(first.resolved_at, second.resolved_at);
        }
    }

    #[test]
    fn test_unknown_id() {
        for store in stores() {
            let err = store.resolve(Uuid::new_v4(), Utc::now()).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<DetectError>(),
                Some(DetectError::AnomalyNotFound { .. })
            ));
            assert!(store.attach_insights(Uuid::new_v4(), "x").is_err());
        }
    }

    #[test]
    fn test_attach_insights() {
        for store in stores() {
            let a = anomaly("a", AnomalyType::FrequentlyFailing, 0);
            store.insert_if_absent(&a).unwrap();
            let updated = store.attach_insights(a.id, "Race in fixture teardown").unwrap();
            assert_eq!(updated.insights.as_deref(), Some("Race in fixture teardown"));
            assert_eq!(updated.details["total_runs"], 10);
        }
    }

    #[test]
    fn test_list_filters_and_order() {
        for store in stores() {
            let old = anomaly("a", AnomalyType::Flaky, 30);
            let new = anomaly("b", AnomalyType::Flaky, 1);
            let slow = anomaly("c", AnomalyType::Slow, 10);
            let mut other = anomaly("d", AnomalyType::Flaky, 5);
            other.project_id = "api".into();
            for a in [&old, &new, &slow, &other] {
                store.insert_if_absent(a).unwrap();
            }
            store.resolve(slow.id, Utc::now()).unwrap();

            let all = store.list(&AnomalyFilter::default()).unwrap();
            let ids: Vec<Uuid> = all.iter().map(|a| a.id).collect();
            assert_eq!(ids, vec![new.id, other.id, slow.id, old.id]);

            let flaky_web = store
                .list(&AnomalyFilter {
                    project_id: Some("web".into()),
                    anomaly_type: Some(AnomalyType::Flaky),
                    resolved: None,
                })
                .unwrap();
            let ids: Vec<Uuid> = flaky_web.iter().map(|a| a.id).collect();
            assert_eq!(ids, vec![new.id, old.id]);

            let resolved = store
                .list(&AnomalyFilter {
                    resolved: Some(true),
                    ..AnomalyFilter::default()
                })
                .unwrap();
            assert_eq!(resolved.len(), 1);
            assert_eq!(resolved[0].id, slow.id);
        }
    }
}
