//! Per-run counters and timestamps kept in the key/value store for operators.

use anyhow::Result;
use std::fmt;
use tracing::debug;

use super::store::ActionLogStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionValue {
    Count(i64),
    Text(String),
}

/// Whether a stored action log value is a zero counter.
pub fn is_zero_value(raw: &str) -> bool {
    raw.trim() == "0"
}

impl fmt::Display for ActionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionValue::Count(n) => write!(f, "{n}"),
            ActionValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ActionValue {
    fn from(n: i64) -> Self {
        ActionValue::Count(n)
    }
}

impl From<usize> for ActionValue {
    fn from(n: usize) -> Self {
        ActionValue::Count(n as i64)
    }
}

impl From<u64> for ActionValue {
    fn from(n: u64) -> Self {
        ActionValue::Count(n as i64)
    }
}

impl From<String> for ActionValue {
    fn from(s: String) -> Self {
        ActionValue::Text(s)
    }
}

/// What a job wants written to the action log, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobReport {
    entries: Vec<(String, ActionValue)>,
}

impl JobReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, value: impl Into<ActionValue>) -> &mut Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ActionValue>) -> Self {
        self.record(key, value);
        self
    }

    pub fn extend(&mut self, other: JobReport) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[(String, ActionValue)] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&ActionValue> {
        self.entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn count(&self, key: &str) -> i64 {
        match self.get(key) {
            Some(ActionValue::Count(n)) => *n,
            _ => 0,
        }
    }
}

/// Writes every entry of `report` to the store.
pub async fn save_report(store: &dyn ActionLogStore, report: &JobReport) -> Result<()> {
    for (key, value) in report.entries() {
        debug!(target = "action_log", key = %key, value = %value, "saving action log entry");
        store.save(key, value).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_entries_shadow_earlier_ones() {
        let report = JobReport::new()
            .with("igdb_load_games_pages", 1usize)
            .with("igdb_load_games_pages", 4usize)
            .with("igdb_load_games_started_at", "2024-01-01".to_string());
        assert_eq!(report.count("igdb_load_games_pages"), 4);
        assert_eq!(report.count("igdb_load_games_started_at"), 0);
        assert_eq!(report.entries().len(), 3);
    }

    #[test]
    fn zero_detection_covers_text_values() {
        assert!(is_zero_value(&ActionValue::Count(0).to_string()));
        assert!(is_zero_value(" 0"));
        assert!(!is_zero_value("2024-01-01"));
        assert!(!is_zero_value("10"));
    }
}
