//! HotFileSync: count-verified refresh of the content store.
//!
//! A sync enumerates every page of the remote into a [`Snapshot`], counting
//! unique entries as it goes. The snapshot replaces the store **only** when
//! the fetched count equals the count the remote declared; otherwise the
//! store is left exactly as it was and [`SyncError::Integrity`] is returned.
//!
//! ```text
//! fetch page 1..N (retry transient failures with backoff)
//!        │
//!        ▼
//!   dedupe by id ──▶ fetched_count == declared_count ? ──no──▶ Integrity error
//!                                   │ yes
//!                                   ▼
//!        under the store lock: load, merge (keep unchanged entries),
//!                          atomic replace
//! ```
//!
//! Integrity failures are never retried automatically. Everything before
//! the final replace is read-only, so a sync can be retried or cancelled at
//! any point.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelFlag;
use crate::config::{Config, RemoteConfig};
use crate::content_store::{Catalog, ContentStore, StoreWrite};
use crate::error::SyncError;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::remote::{RemoteError, RemoteItem, RemotePage, RemoteSource};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Retries per page for transient failures.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt, capped at 32× this value.
    pub backoff_base: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl SyncOptions {
    pub fn from_config(remote: &RemoteConfig) -> Self {
        Self {
            max_retries: remote.max_retries,
            ..Self::default()
        }
    }
}

/// Candidate replacement for the store's content.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub declared_count: usize,
    pub pages: usize,
    pub items: Vec<RemoteItem>,
    /// Items seen again on a later page and dropped.
    pub duplicates: usize,
}

impl Snapshot {
    pub fn fetched_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_complete(&self) -> bool {
        self.fetched_count() == self.declared_count
    }
}

/// Outcome of a successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub declared_count: usize,
    pub fetched_count: usize,
    pub pages: usize,
    pub added: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub removed: usize,
    /// `false` for dry runs and when the store already held this snapshot.
    pub written: bool,
    pub dry_run: bool,
}

pub struct SyncManager {
    store: ContentStore,
    options: SyncOptions,
    cancel: CancelFlag,
}

impl SyncManager {
    pub fn new(store: ContentStore, options: SyncOptions) -> Self {
        Self {
            store,
            options,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch, verify and commit.
    pub async fn sync(
        &self,
        source: &dyn RemoteSource,
        progress: &dyn ProgressReporter,
    ) -> Result<CommitInfo, SyncError> {
        self.run(source, progress, false).await
    }

    /// Fetch and verify without touching the store.
    pub async fn dry_run(
        &self,
        source: &dyn RemoteSource,
        progress: &dyn ProgressReporter,
    ) -> Result<CommitInfo, SyncError> {
        self.run(source, progress, true).await
    }

    async fn run(
        &self,
        source: &dyn RemoteSource,
        progress: &dyn ProgressReporter,
        dry_run: bool,
    ) -> Result<CommitInfo, SyncError> {
        let snapshot = self.fetch_snapshot(source, progress).await?;

        if !snapshot.is_complete() {
            error!(
                source = %source.name(),
                declared = snapshot.declared_count,
                fetched = snapshot.fetched_count(),
                duplicates = snapshot.duplicates,
                "integrity check failed, store left untouched"
            );
            return Err(SyncError::Integrity {
                declared: snapshot.declared_count,
                fetched: snapshot.fetched_count(),
            });
        }

        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        if dry_run {
            let (_, mut info) = merge(&self.store.load_or_default()?, snapshot);
            info.dry_run = true;
            info!(fetched = info.fetched_count, "dry run: snapshot verified, not committed");
            return Ok(info);
        }

        let (write, mut info) = self.store.commit_with(|previous| merge(previous, snapshot))?;
        info.written = write == StoreWrite::Written;
        Ok(info)
    }

    /// Enumerate every page of `source`, deduplicating by id.
    pub async fn fetch_snapshot(
        &self,
        source: &dyn RemoteSource,
        progress: &dyn ProgressReporter,
    ) -> Result<Snapshot, SyncError> {
        let name = source.name();
        let mut seen: HashSet<String> = HashSet::new();
        let mut items: Vec<RemoteItem> = Vec::new();
        let mut declared: Option<usize> = None;
        let mut pages = 0;
        let mut duplicates = 0;
        let mut page = 1;

        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let Some(RemotePage {
                declared_count,
                total_pages,
                items: page_items,
            }) = self.fetch_with_retry(source, page).await?
            else {
                break;
            };

            match declared {
                Some(prev) if prev != declared_count => {
                    warn!(
                        page,
                        before = prev,
                        now = declared_count,
                        "declared count changed during enumeration"
                    );
                }
                _ => {}
            }
            declared = Some(declared_count);

            if page_items.is_empty() {
                break;
            }
            pages += 1;

            let mut fresh = 0;
            for item in page_items {
                if seen.insert(item.id.clone()) {
                    items.push(item);
                    fresh += 1;
                } else {
                    debug!(id = %item.id, page, "duplicate item across pages");
                    duplicates += 1;
                }
            }

            progress.report(ProgressEvent::Fetching {
                source: name.clone(),
                page,
                fetched: items.len(),
                declared: declared_count,
            });

            if fresh == 0 {
                break;
            }
            if matches!(total_pages, Some(total) if page >= total) {
                break;
            }
            page += 1;
        }

        Ok(Snapshot {
            declared_count: declared.unwrap_or(0),
            pages,
            items,
            duplicates,
        })
    }

    async fn fetch_with_retry(
        &self,
        source: &dyn RemoteSource,
        page: usize,
    ) -> Result<Option<RemotePage>, SyncError> {
        let mut last_err = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                // Exponential backoff: base, 2×base, 4×base, ... capped at 32×base
                let delay = self.options.backoff_base * (1u32 << (attempt - 1).min(5));
                warn!(page, attempt, delay_ms = delay.as_millis() as u64, "retrying page fetch");
                tokio::time::sleep(delay).await;
                if self.cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
            }

            match source.fetch_page(page).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    last_err = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_err
            .unwrap_or_else(|| RemoteError::Transient("retries exhausted".to_string()))
            .into())
    }
}

/// Entry point for `taxo sync`: build the configured remote and run.
pub async fn run_sync(
    config: &Config,
    dry_run: bool,
    cancel: CancelFlag,
    progress: &dyn ProgressReporter,
) -> anyhow::Result<CommitInfo> {
    let Some(remote) = &config.remote else {
        anyhow::bail!("No [remote] section in config; nothing to sync from");
    };
    let source = crate::remote::from_config(remote)?;
    let manager = SyncManager::new(ContentStore::from_config(config), SyncOptions::from_config(remote))
        .with_cancel(cancel);

    let info = if dry_run {
        manager.dry_run(source.as_ref(), progress).await?
    } else {
        manager.sync(source.as_ref(), progress).await?
    };
    info!(
        source = %source.name(),
        fetched = info.fetched_count,
        added = info.added,
        changed = info.changed,
        removed = info.removed,
        written = info.written,
        "sync complete"
    );
    Ok(info)
}

/// Build the new catalog from a verified snapshot.
///
/// Entries whose payload checksum is unchanged are carried over from the
/// previous catalog as-is, including `last_synced` and any category set
/// locally since.
fn merge(previous: &Catalog, snapshot: Snapshot) -> (Catalog, CommitInfo) {
    let now = Utc::now();
    let before: HashMap<&str, &taxosync_core::ContentEntry> =
        previous.entries.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut info = CommitInfo {
        declared_count: snapshot.declared_count,
        fetched_count: snapshot.fetched_count(),
        pages: snapshot.pages,
        added: 0,
        changed: 0,
        unchanged: 0,
        removed: 0,
        written: false,
        dry_run: false,
    };

    let mut entries = Vec::with_capacity(snapshot.items.len());
    for item in snapshot.items {
        match before.get(item.id.as_str()) {
            Some(prev) if prev.checksum == item.checksum => {
                info.unchanged += 1;
                entries.push((*prev).clone());
            }
            Some(_) => {
                info.changed += 1;
                entries.push(item.into_entry(now));
            }
            None => {
                info.added += 1;
                entries.push(item.into_entry(now));
            }
        }
    }

    let kept: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    info.removed = previous
        .entries
        .iter()
        .filter(|e| !kept.contains(e.id.as_str()))
        .count();

    let catalog = Catalog {
        declared_count: snapshot.declared_count,
        cached_pages: snapshot.pages,
        updated_at: Some(now),
        entries,
    };
    (catalog, info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves fixed pages; can fail transiently a number of times first.
    struct MemorySource {
        declared: usize,
        pages: Vec<Vec<Value>>,
        transient_failures: Mutex<usize>,
        fatal: bool,
        calls: AtomicUsize,
    }

    impl MemorySource {
        fn new(declared: usize, pages: Vec<Vec<Value>>) -> Self {
            Self {
                declared,
                pages,
                transient_failures: Mutex::new(0),
                fatal: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteSource for MemorySource {
        fn name(&self) -> String {
            "memory".to_string()
        }

        async fn fetch_page(&self, page: usize) -> Result<Option<RemotePage>, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fatal {
                return Err(RemoteError::Fatal("HTTP 401".to_string()));
            }
            {
                let mut left = self.transient_failures.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Err(RemoteError::Transient("connection reset".to_string()));
                }
            }
            let Some(items) = self.pages.get(page - 1) else {
                return Ok(None);
            };
            Ok(Some(RemotePage {
                declared_count: self.declared,
                total_pages: Some(self.pages.len()),
                items: items.iter().map(|v| RemoteItem::from_json(v).unwrap()).collect(),
            }))
        }
    }

    fn post(id: u32, title: &str) -> Value {
        json!({"id": id, "title": title, "description": "desc", "tags": ["t"]})
    }

    fn three_posts() -> Vec<Vec<Value>> {
        vec![vec![post(1, "one"), post(2, "two")], vec![post(3, "three")]]
    }

    fn manager(tmp: &TempDir) -> SyncManager {
        let store = ContentStore::new(tmp.path().join("catalog.json"), tmp.path().join("catalog.lock"));
        SyncManager::new(
            store,
            SyncOptions {
                max_retries: 3,
                backoff_base: Duration::from_millis(1),
            },
        )
    }

    fn store(tmp: &TempDir) -> ContentStore {
        ContentStore::new(tmp.path().join("catalog.json"), tmp.path().join("catalog.lock"))
    }

    #[tokio::test]
    async fn test_matching_count_commits() {
        let tmp = TempDir::new().unwrap();
        let info = manager(&tmp)
            .sync(&MemorySource::new(3, three_posts()), &NoProgress)
            .await
            .unwrap();
        assert_eq!(info.fetched_count, 3);
        assert_eq!(info.pages, 2);
        assert_eq!(info.added, 3);
        assert!(info.written);

        let catalog = store(&tmp).load().unwrap().unwrap();
        assert_eq!(catalog.declared_count, 3);
        assert_eq!(catalog.cached_pages, 2);
        let ids: Vec<&str> = catalog.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_count_mismatch_leaves_store_untouched() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp);
        m.sync(&MemorySource::new(3, three_posts()), &NoProgress)
            .await
            .unwrap();
        let before = std::fs::read(store(&tmp).path()).unwrap();

        let short = vec![vec![post(1, "one"), post(2, "changed")]];
        let err = m
            .sync(&MemorySource::new(3, short), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Integrity {
                declared: 3,
                fetched: 2
            }
        ));
        assert_eq!(std::fs::read(store(&tmp).path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_mismatch_on_first_sync_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let err = manager(&tmp)
            .sync(&MemorySource::new(5, three_posts()), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Integrity { .. }));
        assert!(!store(&tmp).path().exists());
    }

    #[tokio::test]
    async fn test_duplicates_across_pages_count_once() {
        let tmp = TempDir::new().unwrap();
        let drifted = vec![vec![post(1, "one"), post(2, "two")], vec![post(2, "two")]];
        let err = manager(&tmp)
            .sync(&MemorySource::new(3, drifted), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Integrity {
                declared: 3,
                fetched: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let tmp = TempDir::new().unwrap();
        let source = MemorySource::new(3, three_posts());
        *source.transient_failures.lock().unwrap() = 2;
        let info = manager(&tmp).sync(&source, &NoProgress).await.unwrap();
        assert_eq!(info.fetched_count, 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let tmp = TempDir::new().unwrap();
        let source = MemorySource::new(3, three_posts());
        *source.transient_failures.lock().unwrap() = 100;
        let err = manager(&tmp).sync(&source, &NoProgress).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::Transient(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_errors_fail_fast() {
        let tmp = TempDir::new().unwrap();
        let mut source = MemorySource::new(3, three_posts());
        source.fatal = true;
        let err = manager(&tmp).sync(&source, &NoProgress).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::Fatal(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp);
        m.sync(&MemorySource::new(3, three_posts()), &NoProgress)
            .await
            .unwrap();
        let first = store(&tmp).load().unwrap().unwrap();
        let bytes = std::fs::read(store(&tmp).path()).unwrap();

        let info = m
            .sync(&MemorySource::new(3, three_posts()), &NoProgress)
            .await
            .unwrap();
        assert_eq!(info.unchanged, 3);
        assert!(!info.written);
        assert_eq!(std::fs::read(store(&tmp).path()).unwrap(), bytes);
        assert_eq!(store(&tmp).load().unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn test_changed_and_removed_entries() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp);
        m.sync(&MemorySource::new(3, three_posts()), &NoProgress)
            .await
            .unwrap();
        let old = store(&tmp).load().unwrap().unwrap();

        let next = vec![vec![post(1, "one"), post(2, "two, edited"), post(4, "four")]];
        let info = m
            .sync(&MemorySource::new(3, next), &NoProgress)
            .await
            .unwrap();
        assert_eq!((info.added, info.changed, info.unchanged, info.removed), (1, 1, 1, 1));

        let new = store(&tmp).load().unwrap().unwrap();
        assert_eq!(new.get("1").unwrap().last_synced, old.get("1").unwrap().last_synced);
        assert_ne!(new.get("2").unwrap().checksum, old.get("2").unwrap().checksum);
        assert!(new.get("3").is_none());
    }

    /// Applies a human label to the store while the first page is fetched.
    struct LabelingSource {
        inner: MemorySource,
        store: ContentStore,
    }

    #[async_trait]
    impl RemoteSource for LabelingSource {
        fn name(&self) -> String {
            self.inner.name()
        }

        async fn fetch_page(&self, page: usize) -> Result<Option<RemotePage>, RemoteError> {
            if page == 1 {
                self.store.set_category("2", "Manual").unwrap();
            }
            self.inner.fetch_page(page).await
        }
    }

    #[tokio::test]
    async fn test_category_set_mid_sync_survives_resync() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp);
        m.sync(&MemorySource::new(3, three_posts()), &NoProgress)
            .await
            .unwrap();

        let source = LabelingSource {
            inner: MemorySource::new(3, three_posts()),
            store: store(&tmp),
        };
        let info = m.sync(&source, &NoProgress).await.unwrap();
        assert_eq!(info.unchanged, 3);
        assert!(!info.written);

        let catalog = store(&tmp).load().unwrap().unwrap();
        assert_eq!(catalog.get("2").unwrap().category.as_deref(), Some("Manual"));
    }

    #[tokio::test]
    async fn test_dry_run_does_not_write() {
        let tmp = TempDir::new().unwrap();
        let info = manager(&tmp)
            .dry_run(&MemorySource::new(3, three_posts()), &NoProgress)
            .await
            .unwrap();
        assert!(info.dry_run);
        assert!(!info.written);
        assert!(!store(&tmp).path().exists());
    }

    #[tokio::test]
    async fn test_cancelled_sync_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = manager(&tmp)
            .with_cancel(cancel)
            .sync(&MemorySource::new(3, three_posts()), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(!store(&tmp).path().exists());
    }
}
