//! SQLite-backed [`EntityStore`].
//!
//! Every entity is a row of the generic `records` table with its fields
//! stored as a JSON object; filters use `json_extract`. Sync reports go to
//! `sync_log`. Both tables are created by [`crate::migrate`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};

use super::{EntityStore, Filter};
use crate::models::{Entity, SyncReport};

/// SQLite implementation of the [`EntityStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Most recent sync log rows as `(alias, outcome, written, failed)`.
    pub async fn recent_syncs(&self, limit: i64) -> Result<Vec<(String, String, i64, i64)>> {
        let rows = sqlx::query(
            "SELECT alias, outcome, written, failed FROM sync_log ORDER BY finished_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get("alias"),
                    row.get("outcome"),
                    row.get("written"),
                    row.get("failed"),
                )
            })
            .collect())
    }
}

fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

fn row_to_entity(model: &str, id: i64, fields_json: &str) -> Result<Entity> {
    let fields: Map<String, Value> = serde_json::from_str(fields_json)
        .with_context(|| format!("corrupt fields for {} #{}", model, id))?;
    Ok(Entity {
        model: model.to_string(),
        id: Some(id),
        fields: fields.into_iter().collect(),
    })
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn find(&self, model: &str, filters: &[Filter]) -> Result<Vec<Entity>> {
        let mut sql = String::from("SELECT id, fields_json FROM records WHERE model = ?");
        for (field, _) in filters {
            if field == "ID" {
                sql.push_str(" AND id = ?");
            } else {
                sql.push_str(" AND json_extract(fields_json, ?) IS ?");
            }
        }
        sql.push_str(" ORDER BY id ASC");

        let mut query = sqlx::query(&sql).bind(model);
        for (field, value) in filters {
            if field != "ID" {
                query = query.bind(json_path(field));
            }
            query = match value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64()),
                },
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.to_string()),
            };
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let id: i64 = row.get("id");
                let fields_json: String = row.get("fields_json");
                row_to_entity(model, id, &fields_json)
            })
            .collect()
    }

    async fn write(&self, entity: &mut Entity) -> Result<()> {
        let fields_json = serde_json::to_string(&entity.fields)?;
        let now = chrono::Utc::now().timestamp();

        if let Some(id) = entity.id {
            let updated = sqlx::query(
                "UPDATE records SET fields_json = ?, updated_at = ? WHERE id = ? AND model = ?",
            )
            .bind(&fields_json)
            .bind(now)
            .bind(id)
            .bind(&entity.model)
            .execute(&self.pool)
            .await?;
            if updated.rows_affected() > 0 {
                return Ok(());
            }
        }

        let result = sqlx::query(
            "INSERT INTO records (id, model, fields_json, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(entity.id)
        .bind(&entity.model)
        .bind(&fields_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert {}", entity.model))?;
        entity.id = Some(result.last_insert_rowid());
        Ok(())
    }

    async fn delete(&self, model: &str, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM records WHERE model = ? AND id = ?")
            .bind(model)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all(&self, model: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM records WHERE model = ?")
            .bind(model)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn record_sync(&self, report: &SyncReport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_log (run_id, alias, outcome, pages, written, failed,
                                  failures_json, error, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.run_id)
        .bind(&report.alias)
        .bind(report.outcome.as_str())
        .bind(report.pages as i64)
        .bind(report.written as i64)
        .bind(report.failures.len() as i64)
        .bind(serde_json::to_string(&report.failures)?)
        .bind(&report.error)
        .bind(report.started_at.timestamp())
        .bind(report.finished_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::SyncOutcome;
    use serde_json::json;

    async fn store_in(dir: &tempfile::TempDir) -> SqliteStore {
        let mut config = Config::default();
        config.db.path = dir.path().join("quaff.sqlite");
        crate::migrate::run_migrations(&config).await.unwrap();
        SqliteStore::new(crate::db::connect(&config).await.unwrap())
    }

    #[tokio::test]
    async fn round_trip_and_filters() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(&dir).await;

        let mut a = Entity::new("Item");
        a.set("ExternalId", json!(1));
        a.set("Name", json!("A"));
        store.write(&mut a).await.unwrap();
        let mut b = Entity::new("Item");
        b.set("ExternalId", json!(2));
        b.set("Name", json!("B"));
        store.write(&mut b).await.unwrap();
        assert_ne!(a.id, b.id);

        let found = store
            .find("Item", &[("ExternalId".into(), json!(2))])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("Name"), Some(json!("B")));

        b.set("Name", json!("B2"));
        store.write(&mut b).await.unwrap();
        let found = store
            .find("Item", &[("ID".into(), json!(b.id))])
            .await
            .unwrap();
        assert_eq!(found[0].get("Name"), Some(json!("B2")));

        let missing = store
            .find("Item", &[("Category".into(), Value::Null)])
            .await
            .unwrap();
        assert_eq!(missing.len(), 2);

        assert_eq!(store.delete_all("Item").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sync_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let report = crate::models::SyncReport::start("list:items").finish(SyncOutcome::Ok, None);
        store.record_sync(&report).await.unwrap();
        let recent = store.recent_syncs(5).await.unwrap();
        assert_eq!(recent, vec![("list:items".to_string(), "ok".to_string(), 0, 0)]);
    }
}
