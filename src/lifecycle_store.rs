//! Persisted per-entry lifecycle state.
//!
//! Entries without a row are `unclassified`. Transitions are validated by
//! [`EntryState::apply`]; an invalid event leaves the stored state as is.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use taxosync_core::lifecycle::{EntryState, LifecycleEvent};

pub async fn get_state(pool: &SqlitePool, content_id: &str) -> Result<EntryState> {
    let row: Option<String> =
        sqlx::query_scalar("SELECT state FROM entry_states WHERE content_id = ?")
            .bind(content_id)
            .fetch_optional(pool)
            .await?;
    match row {
        Some(s) => s.parse(),
        None => Ok(EntryState::Unclassified),
    }
}

/// Apply `event` to the entry's state and persist the result.
pub async fn transition(
    pool: &SqlitePool,
    content_id: &str,
    event: LifecycleEvent,
) -> Result<EntryState> {
    let current = get_state(pool, content_id).await?;
    let next = current.apply(event)?;
    if next != current {
        sqlx::query(
            r#"
            INSERT INTO entry_states (content_id, state, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(content_id) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(content_id)
        .bind(next.as_str())
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await?;
    }
    Ok(next)
}

/// Entries whose current state satisfies `keep`.
pub async fn entries_where(
    pool: &SqlitePool,
    keep: impl Fn(EntryState) -> bool,
) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT content_id, state FROM entry_states ORDER BY content_id")
        .fetch_all(pool)
        .await?;
    let mut out = Vec::new();
    for row in rows {
        let state: EntryState = row.get::<String, _>("state").parse()?;
        if keep(state) {
            out.push(row.get("content_id"));
        }
    }
    Ok(out)
}

/// Number of tracked entries per state.
pub async fn counts(pool: &SqlitePool) -> Result<BTreeMap<String, i64>> {
    let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM entry_states GROUP BY state")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|r| (r.get::<String, _>("state"), r.get::<i64, _>("n")))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::memory_pool as pool;

    #[tokio::test]
    async fn test_untracked_entry_is_unclassified() {
        let pool = pool().await;
        assert_eq!(get_state(&pool, "1").await.unwrap(), EntryState::Unclassified);
    }

    #[tokio::test]
    async fn test_transitions_persist() {
        let pool = pool().await;
        transition(&pool, "1", LifecycleEvent::Suggested).await.unwrap();
        transition(&pool, "1", LifecycleEvent::Confirmed).await.unwrap();
        transition(&pool, "2", LifecycleEvent::Corrected).await.unwrap();
        assert_eq!(get_state(&pool, "1").await.unwrap(), EntryState::UserConfirmed);

        let pending = entries_where(&pool, EntryState::is_pending_training)
            .await
            .unwrap();
        assert_eq!(pending, vec!["1", "2"]);

        let c = counts(&pool).await.unwrap();
        assert_eq!(c.get("user_confirmed"), Some(&1));
    }

    #[tokio::test]
    async fn test_invalid_transition_keeps_state() {
        let pool = pool().await;
        transition(&pool, "1", LifecycleEvent::Suggested).await.unwrap();
        assert!(transition(&pool, "1", LifecycleEvent::Consumed).await.is_err());
        assert_eq!(get_state(&pool, "1").await.unwrap(), EntryState::AutoSuggested);
    }
}
