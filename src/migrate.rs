use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per (channel, algorithm) model invocation
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classification_records (
            id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            algorithm TEXT NOT NULL,
            label TEXT,
            confidence REAL NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Full ensemble result per classify() call
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS suggestions (
            id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            label TEXT NOT NULL,
            confidence REAL NOT NULL,
            low_confidence INTEGER NOT NULL,
            decision TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS corrected_labels (
            id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            label TEXT NOT NULL,
            origin TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entry_states (
            content_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_content ON classification_records(content_id, channel)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_suggestions_content ON suggestions(content_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_labels_content ON corrected_labels(content_id, channel)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
