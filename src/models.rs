//! Core data models used throughout quaff.
//!
//! These types represent the local entities that remote items are mapped
//! into, and the per-endpoint sync reports produced by each pass.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A local record of a named model.
///
/// `id` is `None` until the entity has been written once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub model: String,
    pub id: Option<i64>,
    pub fields: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: None,
            fields: BTreeMap::new(),
        }
    }

    /// Field value by name, `ID` resolving to the entity id.
    pub fn get(&self, name: &str) -> Option<Value> {
        if name == "ID" {
            return self.id.map(Value::from);
        }
        self.fields.get(name).cloned()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

/// Terminal outcome of one endpoint pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Ok,
    Failed,
    Cancelled,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Ok => "ok",
            SyncOutcome::Failed => "failed",
            SyncOutcome::Cancelled => "cancelled",
        }
    }
}

/// An item that failed to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Zero-based position of the item across the whole pass.
    pub index: usize,
    pub reason: String,
}

/// Result of syncing one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub alias: String,
    pub outcome: SyncOutcome,
    pub pages: u64,
    pub written: u64,
    pub failures: Vec<ItemFailure>,
    /// Why the pass failed, when `outcome` is `Failed`.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn start(alias: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            alias: alias.into(),
            outcome: SyncOutcome::Ok,
            pages: 0,
            written: 0,
            failures: Vec::new(),
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn finish(mut self, outcome: SyncOutcome, error: Option<String>) -> Self {
        self.outcome = outcome;
        self.error = error;
        self.finished_at = Utc::now();
        self
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == SyncOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_id_field() {
        let mut e = Entity::new("Item");
        assert!(e.is_new());
        assert_eq!(e.get("ID"), None);
        e.id = Some(7);
        e.set("Name", json!("A"));
        assert_eq!(e.get("ID"), Some(json!(7)));
        assert_eq!(e.get("Name"), Some(json!("A")));
    }

    #[test]
    fn report_lifecycle() {
        let report = SyncReport::start("list:items").finish(SyncOutcome::Failed, Some("x".into()));
        assert!(!report.is_ok());
        assert_eq!(report.outcome.as_str(), "failed");
        assert!(report.finished_at >= report.started_at);
        assert_eq!(report.run_id.len(), 36);
    }
}
