//! Per-test execution history, the detector's only input.

use std::collections::BTreeMap;

use crate::parse::TestStatus;

/// One historical execution of a specific test.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionHistoryEntry {
    pub test_id: String,
    pub test_name: String,
    pub status: TestStatus,
    pub duration_ms: f64,
}

/// All executions of one test identity.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TestHistory {
    pub test_id: String,
    pub test_name: String,
    pub executions: Vec<ExecutionHistoryEntry>,
}

impl TestHistory {
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.executions.iter().filter(|e| e.status == status).count()
    }

    pub fn mean_duration(&self) -> f64 {
        if self.executions.is_empty() {
            return 0.0;
        }
        self.executions.iter().map(|e| e.duration_ms).sum::<f64>() / self.executions.len() as f64
    }

    pub fn max_duration(&self) -> f64 {
        self.executions
            .iter()
            .map(|e| e.duration_ms)
            .fold(0.0, f64::max)
    }
}

/// Group a flat list of executions by `test_id`, ordered by id.
pub fn group_history(entries: impl IntoIterator<Item = ExecutionHistoryEntry>) -> Vec<TestHistory> {
    let mut groups: BTreeMap<String, TestHistory> = BTreeMap::new();
    for entry in entries {
        groups
            .entry(entry.test_id.clone())
            .or_insert_with(|| TestHistory {
                test_id: entry.test_id.clone(),
                test_name: entry.test_name.clone(),
                executions: Vec::new(),
            })
            .executions
            .push(entry);
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, status: TestStatus, duration_ms: f64) -> ExecutionHistoryEntry {
        ExecutionHistoryEntry {
            test_id: id.to_string(),
            test_name: id.rsplit("::").next().unwrap_or(id).to_string(),
            status,
            duration_ms,
        }
    }

    #[test]
    fn test_grouping() {
        let groups = group_history(vec![
            entry("b.ts::two", TestStatus::Passed, 10.0),
            entry("a.ts::one", TestStatus::Failed, 30.0),
            entry("b.ts::two", TestStatus::Failed, 20.0),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].test_id, "a.ts::one");
        assert_eq!(groups[1].test_name, "two");
        assert_eq!(groups[1].len(), 2);
        assert_eq!(groups[1].count(TestStatus::Failed), 1);
        assert_eq!(groups[1].mean_duration(), 15.0);
        assert_eq!(groups[1].max_duration(), 20.0);
    }

    #[test]
    fn test_empty_history_stats() {
        let h = TestHistory {
            test_id: "x".into(),
            test_name: "x".into(),
            executions: Vec::new(),
        };
        assert!(h.is_empty());
        assert_eq!(h.mean_duration(), 0.0);
    }
}
