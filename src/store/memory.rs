//! In-memory [`EntityStore`] for tests and dry runs.
//!
//! Entities live in a `BTreeMap` keyed by `(model, id)` behind a
//! `std::sync::RwLock`; ids are allocated from a single counter.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{entity_matches, EntityStore, Filter};
use crate::models::{Entity, SyncReport};

#[derive(Default)]
struct State {
    next_id: i64,
    entities: BTreeMap<(String, i64), Entity>,
    reports: Vec<SyncReport>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// All entities of a model, in id order.
    pub fn all(&self, model: &str) -> Vec<Entity> {
        self.read()
            .entities
            .iter()
            .filter(|((m, _), _)| m == model)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Reports handed to [`EntityStore::record_sync`].
    pub fn reports(&self) -> Vec<SyncReport> {
        self.read().reports.clone()
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn find(&self, model: &str, filters: &[Filter]) -> Result<Vec<Entity>> {
        Ok(self
            .read()
            .entities
            .iter()
            .filter(|((m, _), e)| m == model && entity_matches(e, filters))
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn write(&self, entity: &mut Entity) -> Result<()> {
        let mut state = self.write_state();
        let id = match entity.id {
            Some(id) => {
                state.next_id = state.next_id.max(id);
                id
            }
            None => {
                state.next_id += 1;
                state.next_id
            }
        };
        entity.id = Some(id);
        state
            .entities
            .insert((entity.model.clone(), id), entity.clone());
        Ok(())
    }

    async fn delete(&self, model: &str, id: i64) -> Result<()> {
        self.write_state().entities.remove(&(model.to_string(), id));
        Ok(())
    }

    async fn delete_all(&self, model: &str) -> Result<u64> {
        let mut state = self.write_state();
        let before = state.entities.len();
        state.entities.retain(|(m, _), _| m != model);
        Ok((before - state.entities.len()) as u64)
    }

    async fn record_sync(&self, report: &SyncReport) -> Result<()> {
        self.write_state().reports.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn write_assigns_ids_and_updates() {
        let store = InMemoryStore::new();
        let mut a = Entity::new("Item");
        a.set("Name", json!("A"));
        store.write(&mut a).await.unwrap();
        assert_eq!(a.id, Some(1));

        a.set("Name", json!("A2"));
        store.write(&mut a).await.unwrap();
        let all = store.all("Item");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("Name"), Some(json!("A2")));
    }

    #[tokio::test]
    async fn find_and_delete() {
        let store = InMemoryStore::new();
        for name in ["A", "B", "C"] {
            let mut e = Entity::new("Item");
            e.set("Name", json!(name));
            store.write(&mut e).await.unwrap();
        }
        let mut other = Entity::new("Tag");
        store.write(&mut other).await.unwrap();

        let found = store
            .find("Item", &[("Name".into(), json!("B"))])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        store.delete("Item", found[0].id.unwrap()).await.unwrap();
        assert_eq!(store.all("Item").len(), 2);
        assert_eq!(store.delete_all("Item").await.unwrap(), 2);
        assert_eq!(store.all("Tag").len(), 1);
    }
}
