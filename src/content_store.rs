//! Durable local snapshot of the remote content catalog.
//!
//! The store is a single JSON file holding the declared count, paging
//! metadata, and the ordered list of [`ContentEntry`] values. It is only ever
//! replaced whole, under an advisory lock, through
//! [`write_atomic`](crate::atomic::write_atomic); a failed or interrupted
//! write leaves the previous file in place.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use taxosync_core::ContentEntry;

use crate::atomic::{with_exclusive_lock, write_atomic};
use crate::config::Config;

/// On-disk catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Element count reported by the remote at commit time.
    pub declared_count: usize,
    #[serde(default)]
    pub cached_pages: usize,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub entries: Vec<ContentEntry>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ContentEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Equal apart from `updated_at`.
    pub fn same_content(&self, other: &Catalog) -> bool {
        self.declared_count == other.declared_count
            && self.cached_pages == other.cached_pages
            && self.entries == other.entries
    }
}

/// Result of [`ContentStore::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreWrite {
    Written,
    /// The store already held identical content; nothing was written.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct ContentStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl ContentStore {
    pub fn new(path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_path: lock_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.store.path.clone(), config.store_lock_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current catalog. `Ok(None)` when no sync has committed yet.
    pub fn load(&self) -> Result<Option<Catalog>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read store: {}", self.path.display()))
            }
        };
        let catalog = serde_json::from_slice(&bytes)
            .with_context(|| format!("Store file is not a valid catalog: {}", self.path.display()))?;
        Ok(Some(catalog))
    }

    pub fn load_or_default(&self) -> Result<Catalog> {
        Ok(self.load()?.unwrap_or_default())
    }

    /// Replace the store with `catalog`.
    pub fn commit(&self, catalog: &Catalog) -> Result<StoreWrite> {
        self.commit_with(|_| (catalog.clone(), ()))
            .map(|(write, ())| write)
    }

    /// Read, rebuild and replace the store in one locked section.
    ///
    /// `build` receives the catalog as it is on disk under the lock, so a
    /// concurrent [`set_category`](Self::set_category) is either fully
    /// before or fully after it.
    pub fn commit_with<T>(
        &self,
        build: impl FnOnce(&Catalog) -> (Catalog, T),
    ) -> Result<(StoreWrite, T)> {
        with_exclusive_lock(&self.lock_path, || {
            let current = self.load()?;
            let (catalog, extra) = build(current.as_ref().unwrap_or(&Catalog::default()));
            if matches!(&current, Some(c) if c.same_content(&catalog)) {
                debug!(path = %self.path.display(), "store unchanged, skipping write");
                return Ok((StoreWrite::Unchanged, extra));
            }
            self.write(&catalog)?;
            info!(
                path = %self.path.display(),
                entries = catalog.len(),
                "store committed"
            );
            Ok((StoreWrite::Written, extra))
        })
    }

    /// Set the category of one entry. Returns `false` when it already had
    /// that category.
    pub fn set_category(&self, id: &str, category: &str) -> Result<bool> {
        with_exclusive_lock(&self.lock_path, || {
            let Some(mut catalog) = self.load()? else {
                bail!("Store is empty; run `taxo sync` first");
            };
            let Some(entry) = catalog.entries.iter_mut().find(|e| e.id == id) else {
                bail!("No entry with id '{}' in the store", id);
            };
            if entry.category.as_deref() == Some(category) {
                return Ok(false);
            }
            entry.category = Some(category.to_string());
            catalog.updated_at = Some(Utc::now());
            self.write(&catalog)?;
            Ok(true)
        })
    }

    fn write(&self, catalog: &Catalog) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(catalog)?;
        write_atomic(&self.path, &bytes)
            .with_context(|| format!("Failed to write store: {}", self.path.display()))
    }
}
