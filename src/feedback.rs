//! CorrectionFeedback: human-confirmed and human-corrected labels.
//!
//! Labels are appended to `corrected_labels`, one row per (entry, channel).
//! A newer row for the same key supersedes the older one; rows are never
//! edited. The training pipeline reads the latest row per key through
//! [`CorrectionFeedback::latest_labels`].
//!
//! Mirroring a label into the content store's category is best-effort: the
//! label row and lifecycle transition are committed first, and a failed
//! store write is logged rather than returned.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use taxosync_core::lifecycle::{EntryState, LifecycleEvent};
use taxosync_core::Channel;

use crate::audit;
use crate::content_store::ContentStore;
use crate::lifecycle_store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelOrigin {
    /// A human accepted the ensemble's suggestion.
    Confirmed,
    /// A human supplied the label.
    Corrected,
}

impl LabelOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelOrigin::Confirmed => "confirmed",
            LabelOrigin::Corrected => "corrected",
        }
    }

    fn event(&self) -> LifecycleEvent {
        match self {
            LabelOrigin::Confirmed => LifecycleEvent::Confirmed,
            LabelOrigin::Corrected => LifecycleEvent::Corrected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectedLabel {
    pub content_id: String,
    pub channel: Channel,
    pub label: String,
    pub origin: LabelOrigin,
    pub created_at: DateTime<Utc>,
}

pub struct CorrectionFeedback {
    pool: SqlitePool,
    store: ContentStore,
}

impl CorrectionFeedback {
    pub fn new(pool: SqlitePool, store: ContentStore) -> Self {
        Self { pool, store }
    }

    /// Record a human label for `channels` of one entry.
    ///
    /// When the label covers all three channels and the entry is in the
    /// content store, the store's category is updated to match (best-effort).
    pub async fn correct(
        &self,
        content_id: &str,
        channels: &[Channel],
        label: &str,
    ) -> Result<Vec<CorrectedLabel>> {
        let label = label.trim();
        if label.is_empty() {
            bail!("Label must not be empty");
        }
        let written = self
            .record(content_id, channels, label, LabelOrigin::Corrected)
            .await?;
        if Channel::ALL.iter().all(|c| channels.contains(c)) {
            self.apply_to_store(content_id, label);
        }
        Ok(written)
    }

    /// Accept the latest suggestion for `content_id` as the label of every
    /// channel.
    pub async fn confirm(&self, content_id: &str) -> Result<Vec<CorrectedLabel>> {
        let Some(suggestion) = audit::latest_suggestion(&self.pool, content_id).await? else {
            bail!("No suggestion recorded for '{}'; run `taxo classify` first", content_id);
        };
        if suggestion.is_fallback() {
            bail!(
                "Latest suggestion for '{}' is the fallback label; use `taxo label` instead",
                content_id
            );
        }
        let written = self
            .record(content_id, &Channel::ALL, &suggestion.label, LabelOrigin::Confirmed)
            .await?;
        self.apply_to_store(content_id, &suggestion.label);
        Ok(written)
    }

    async fn record(
        &self,
        content_id: &str,
        channels: &[Channel],
        label: &str,
        origin: LabelOrigin,
    ) -> Result<Vec<CorrectedLabel>> {
        if channels.is_empty() {
            bail!("At least one channel is required");
        }
        // Validate before anything is written
        let state = lifecycle_store::get_state(&self.pool, content_id).await?;
        state.apply(origin.event())?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut written = Vec::with_capacity(channels.len());
        for channel in channels {
            sqlx::query(
                r#"
                INSERT INTO corrected_labels (id, content_id, channel, label, origin, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(content_id)
            .bind(channel.as_str())
            .bind(label)
            .bind(origin.as_str())
            .bind(now.timestamp_millis())
            .execute(&mut *tx)
            .await?;
            written.push(CorrectedLabel {
                content_id: content_id.to_string(),
                channel: *channel,
                label: label.to_string(),
                origin,
                created_at: now,
            });
        }
        tx.commit().await?;

        let next = lifecycle_store::transition(&self.pool, content_id, origin.event()).await?;
        info!(
            id = content_id,
            label,
            origin = origin.as_str(),
            channels = channels.len(),
            state = %next,
            "label recorded"
        );
        Ok(written)
    }

    fn apply_to_store(&self, content_id: &str, label: &str) {
        if let Err(e) = self.try_apply_to_store(content_id, label) {
            warn!(id = content_id, error = %e, "label recorded but store category not updated");
        }
    }

    fn try_apply_to_store(&self, content_id: &str, label: &str) -> Result<()> {
        let present = self
            .store
            .load()?
            .map(|c| c.get(content_id).is_some())
            .unwrap_or(false);
        if present && self.store.set_category(content_id, label)? {
            info!(id = content_id, category = label, "store category updated");
        }
        Ok(())
    }

    /// Latest label per (entry, channel).
    pub async fn latest_labels(&self) -> Result<BTreeMap<(String, Channel), CorrectedLabel>> {
        latest_labels(&self.pool).await
    }

    pub async fn state(&self, content_id: &str) -> Result<EntryState> {
        lifecycle_store::get_state(&self.pool, content_id).await
    }
}

pub async fn latest_labels(
    pool: &SqlitePool,
) -> Result<BTreeMap<(String, Channel), CorrectedLabel>> {
    let rows = sqlx::query(
        r#"
        SELECT content_id, channel, label, origin, created_at
        FROM corrected_labels
        ORDER BY created_at ASC, rowid ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut out = BTreeMap::new();
    for row in rows {
        let channel: Channel = row.get::<String, _>("channel").parse()?;
        let origin = match row.get::<String, _>("origin").as_str() {
            "confirmed" => LabelOrigin::Confirmed,
            _ => LabelOrigin::Corrected,
        };
        let label = CorrectedLabel {
            content_id: row.get("content_id"),
            channel,
            label: row.get("label"),
            origin,
            created_at: Utc
                .timestamp_millis_opt(row.get("created_at"))
                .single()
                .unwrap_or_default(),
        };
        // Later rows overwrite earlier ones
        out.insert((label.content_id.clone(), channel), label);
    }
    Ok(out)
}

pub async fn label_count(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM corrected_labels")
        .fetch_one(pool)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_store::testing::entry;
    use crate::content_store::Catalog;
    use crate::db::testing::memory_pool;
    use taxosync_core::ensemble::{combine_channel, combine_channels, EnsemblePolicy, ModelVote};
    use taxosync_core::{Algorithm, Prediction};
    use tempfile::TempDir;

    async fn setup(tmp: &TempDir) -> CorrectionFeedback {
        let store = ContentStore::new(tmp.path().join("catalog.json"), tmp.path().join("catalog.lock"));
        store
            .commit(&Catalog {
                declared_count: 1,
                cached_pages: 1,
                updated_at: None,
                entries: vec![entry("1", "Hot oil massage", &["massage"], None)],
            })
            .unwrap();
        CorrectionFeedback::new(memory_pool().await, store)
    }

    async fn suggest(fb: &CorrectionFeedback, id: &str, label: &str) {
        let policy = EnsemblePolicy::default();
        let channels = Channel::ALL
            .iter()
            .map(|c| {
                let votes = Algorithm::ALL
                    .iter()
                    .map(|a| ModelVote {
                        algorithm: *a,
                        prediction: Some(Prediction {
                            label: label.to_string(),
                            confidence: 0.8,
                        }),
                    })
                    .collect();
                combine_channel(*c, votes, &policy)
            })
            .collect();
        let s = combine_channels(id, channels, &policy);
        audit::append(&fb.pool, &s).await.unwrap();
        lifecycle_store::transition(&fb.pool, id, LifecycleEvent::Suggested)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_correction_supersedes_previous() {
        let tmp = TempDir::new().unwrap();
        let fb = setup(&tmp).await;
        fb.correct("1", &[Channel::Title], "Spa").await.unwrap();
        fb.correct("1", &[Channel::Title], "Massage").await.unwrap();
        let labels = fb.latest_labels().await.unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[&("1".to_string(), Channel::Title)].label, "Massage");
        assert_eq!(fb.state("1").await.unwrap(), EntryState::UserCorrected);
    }

    #[tokio::test]
    async fn test_single_channel_correction_leaves_store_category() {
        let tmp = TempDir::new().unwrap();
        let fb = setup(&tmp).await;
        fb.correct("1", &[Channel::Tags], "Massage").await.unwrap();
        let catalog = fb.store.load().unwrap().unwrap();
        assert_eq!(catalog.get("1").unwrap().category, None);
    }

    #[tokio::test]
    async fn test_all_channel_correction_updates_store() {
        let tmp = TempDir::new().unwrap();
        let fb = setup(&tmp).await;
        let written = fb.correct("1", &Channel::ALL, "Massage").await.unwrap();
        assert_eq!(written.len(), 3);
        let catalog = fb.store.load().unwrap().unwrap();
        assert_eq!(catalog.get("1").unwrap().category.as_deref(), Some("Massage"));
    }

    #[tokio::test]
    async fn test_correction_for_unknown_entry_skips_store() {
        let tmp = TempDir::new().unwrap();
        let fb = setup(&tmp).await;
        fb.correct("text:abc", &Channel::ALL, "Spa").await.unwrap();
        assert_eq!(fb.latest_labels().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_store_still_records_label() {
        let tmp = TempDir::new().unwrap();
        let fb = setup(&tmp).await;
        std::fs::write(fb.store.path(), b"{not json").unwrap();

        let written = fb.correct("1", &Channel::ALL, "Massage").await.unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(fb.state("1").await.unwrap(), EntryState::UserCorrected);
        assert_eq!(fb.latest_labels().await.unwrap().len(), 3);
        assert_eq!(std::fs::read(fb.store.path()).unwrap(), b"{not json");
    }

    #[tokio::test]
    async fn test_confirm_uses_latest_suggestion() {
        let tmp = TempDir::new().unwrap();
        let fb = setup(&tmp).await;
        suggest(&fb, "1", "Massage").await;
        let written = fb.confirm("1").await.unwrap();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|l| l.origin == LabelOrigin::Confirmed));
        assert_eq!(fb.state("1").await.unwrap(), EntryState::UserConfirmed);
    }

    #[tokio::test]
    async fn test_confirm_without_suggestion_fails() {
        let tmp = TempDir::new().unwrap();
        let fb = setup(&tmp).await;
        assert!(fb.confirm("1").await.is_err());
        assert_eq!(label_count(&fb.pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_label_rejected() {
        let tmp = TempDir::new().unwrap();
        let fb = setup(&tmp).await;
        assert!(fb.correct("1", &[Channel::Title], "  ").await.is_err());
    }
}
