//! Entity persistence.
//!
//! The sync pipeline only needs a narrow persistence surface: look records
//! up by field values, write one, delete some. [`EntityStore`] is that
//! surface; relations are plain fields on top of it:
//!
//! - has-one: the owner carries `<Relation>ID`
//! - has-many: children carry the owner id in their foreign key field
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`memory::InMemoryStore`] | tests, `fetch` dry runs |
//! | [`sqlite::SqliteStore`] | the `quaff sync` CLI |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Entity, SyncReport};

/// Field equality filter; `ID` matches the entity id.
pub type Filter = (String, Value);

/// Abstract persistence backend for mapped entities.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// All entities of `model` whose fields equal every filter value.
    async fn find(&self, model: &str, filters: &[Filter]) -> Result<Vec<Entity>>;

    /// Insert or update an entity, assigning `id` on first write.
    async fn write(&self, entity: &mut Entity) -> Result<()>;

    async fn delete(&self, model: &str, id: i64) -> Result<()>;

    /// Delete every entity of `model`, returning how many were removed.
    async fn delete_all(&self, model: &str) -> Result<u64>;

    /// Persist the outcome of an endpoint pass.
    async fn record_sync(&self, _report: &SyncReport) -> Result<()> {
        Ok(())
    }
}

/// Loose equality used by filters: scalars compare by their text form so
/// `1` matches `"1"`.
pub fn values_match(stored: Option<&Value>, wanted: &Value) -> bool {
    match (stored, wanted) {
        (None, Value::Null) => true,
        (None, _) => false,
        (Some(a), b) if a == b => true,
        (Some(a), b) => match (scalar_text(a), scalar_text(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// True when `entity` satisfies every filter.
pub fn entity_matches(entity: &Entity, filters: &[Filter]) -> bool {
    filters.iter().all(|(field, wanted)| {
        let stored = entity.get(field);
        values_match(stored.as_ref(), wanted)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loose_scalar_matching() {
        assert!(values_match(Some(&json!(1)), &json!("1")));
        assert!(values_match(Some(&json!("a")), &json!("a")));
        assert!(!values_match(Some(&json!("a")), &json!("b")));
        assert!(values_match(None, &Value::Null));
        assert!(!values_match(None, &json!(1)));
        assert!(!values_match(Some(&json!([1])), &json!("1")));
    }

    #[test]
    fn id_filter() {
        let mut e = Entity::new("Item");
        e.id = Some(3);
        e.set("Name", json!("A"));
        assert!(entity_matches(&e, &[("ID".into(), json!(3))]));
        assert!(entity_matches(&e, &[("Name".into(), json!("A"))]));
        assert!(!entity_matches(&e, &[("Name".into(), json!("B"))]));
    }
}
