use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Create records table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            model TEXT NOT NULL,
            fields_json TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create sync log table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_log (
            run_id TEXT PRIMARY KEY,
            alias TEXT NOT NULL,
            outcome TEXT NOT NULL,
            pages INTEGER NOT NULL DEFAULT 0,
            written INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            failures_json TEXT NOT NULL DEFAULT '[]',
            error TEXT,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_model ON records(model)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_log_alias ON sync_log(alias, finished_at DESC)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
