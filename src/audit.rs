//! Append-only classification audit trail.
//!
//! Every classify() call writes one `classification_records` row per
//! (channel, algorithm) model that was invoked, plus the full
//! [`TaxonomySuggestion`] in `suggestions`. Rows are never updated.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use taxosync_core::ensemble::TaxonomySuggestion;
use taxosync_core::{Algorithm, Channel};

/// One model invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationRecord {
    pub content_id: String,
    pub channel: Channel,
    pub algorithm: Algorithm,
    /// `None` when the model abstained.
    pub label: Option<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Append the records and the suggestion in one transaction.
pub async fn append(pool: &SqlitePool, suggestion: &TaxonomySuggestion) -> Result<()> {
    let now = Utc::now().timestamp_millis();
    let mut tx = pool.begin().await?;

    for channel in &suggestion.channels {
        for vote in &channel.votes {
            let (label, confidence) = match &vote.prediction {
                Some(p) => (Some(p.label.as_str()), p.confidence),
                None => (None, 0.0),
            };
            sqlx::query(
                r#"
                INSERT INTO classification_records
                    (id, content_id, channel, algorithm, label, confidence, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&suggestion.content_id)
            .bind(channel.channel.as_str())
            .bind(vote.algorithm.as_str())
            .bind(label)
            .bind(confidence)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
    }

    sqlx::query(
        r#"
        INSERT INTO suggestions
            (id, content_id, label, confidence, low_confidence, decision, payload_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&suggestion.content_id)
    .bind(&suggestion.label)
    .bind(suggestion.confidence)
    .bind(suggestion.low_confidence)
    .bind(suggestion.decision.as_str())
    .bind(serde_json::to_string(suggestion)?)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Most recent suggestion for `content_id`.
pub async fn latest_suggestion(
    pool: &SqlitePool,
    content_id: &str,
) -> Result<Option<TaxonomySuggestion>> {
    let payload: Option<String> = sqlx::query_scalar(
        r#"
        SELECT payload_json FROM suggestions
        WHERE content_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(content_id)
    .fetch_optional(pool)
    .await?;

    payload
        .map(|p| serde_json::from_str(&p).context("Corrupt suggestion payload"))
        .transpose()
}

/// All records for one entry, oldest first.
pub async fn records_for(pool: &SqlitePool, content_id: &str) -> Result<Vec<ClassificationRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT content_id, channel, algorithm, label, confidence, created_at
        FROM classification_records
        WHERE content_id = ?
        ORDER BY created_at ASC, rowid ASC
        "#,
    )
    .bind(content_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| {
            Ok(ClassificationRecord {
                content_id: r.get("content_id"),
                channel: r.get::<String, _>("channel").parse()?,
                algorithm: r.get::<String, _>("algorithm").parse()?,
                label: r.get("label"),
                confidence: r.get("confidence"),
                created_at: Utc
                    .timestamp_millis_opt(r.get("created_at"))
                    .single()
                    .unwrap_or_default(),
            })
        })
        .collect()
}

pub async fn record_count(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM classification_records")
        .fetch_one(pool)
        .await?)
}

pub async fn suggestion_count(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM suggestions")
        .fetch_one(pool)
        .await?)
}
