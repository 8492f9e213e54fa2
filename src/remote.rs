//! Remote catalog sources.
//!
//! A [`RemoteSource`] serves the catalog one page at a time and reports the
//! total element count it *declares* for the collection. The sync layer only
//! relies on that contract; retries and integrity checks live in
//! [`sync`](crate::sync).
//!
//! Two implementations ship with the crate:
//!
//! | Kind | Type | Declared count from |
//! |------|------|---------------------|
//! | `http` | [`HttpSource`] | response header (`x-wp-total` by default) |
//! | `file` | [`FileSource`] | `total` field of a JSON dump |

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use taxosync_core::features::strip_markup;
use taxosync_core::models::payload_checksum;
use taxosync_core::ContentEntry;

use crate::config::{RemoteConfig, RemoteKind};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Network failure, timeout, 429 or 5xx. Worth retrying.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The remote refused the request. Retrying will not help.
    #[error("remote rejected request: {0}")]
    Fatal(String),

    #[error("malformed remote response: {0}")]
    Malformed(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// One page of the remote catalog.
#[derive(Debug, Clone)]
pub struct RemotePage {
    pub declared_count: usize,
    pub total_pages: Option<usize>,
    pub items: Vec<RemoteItem>,
}

/// A catalog item as served by the remote, before it enters the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    /// SHA-256 of the item's raw JSON.
    pub checksum: String,
}

impl RemoteItem {
    /// Parse one item of a remote payload.
    ///
    /// Text fields may be plain strings or WordPress-style
    /// `{"rendered": "..."}` objects. The description falls back to
    /// `excerpt`, then `content`. Tags and categories may be strings or
    /// numeric term ids.
    pub fn from_json(value: &Value) -> Result<Self, RemoteError> {
        let id = match value.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(RemoteError::Malformed("item without an 'id'".to_string())),
        };

        let description = ["description", "excerpt", "content"]
            .iter()
            .find_map(|k| value.get(*k).and_then(text_field))
            .unwrap_or_default();

        let tags = value
            .get("tags")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(term).collect())
            .unwrap_or_default();

        let category = value
            .get("category")
            .and_then(term)
            .or_else(|| {
                value
                    .get("categories")
                    .and_then(Value::as_array)
                    .and_then(|arr| arr.iter().find_map(term))
            });

        let raw = serde_json::to_vec(value).map_err(|e| RemoteError::Malformed(e.to_string()))?;

        Ok(RemoteItem {
            id,
            title: value.get("title").and_then(text_field).unwrap_or_default(),
            description,
            tags,
            category,
            checksum: payload_checksum(&raw),
        })
    }

    pub fn into_entry(self, synced_at: DateTime<Utc>) -> ContentEntry {
        ContentEntry {
            id: self.id,
            title: self.title,
            description: self.description,
            tags: self.tags,
            category: self.category,
            checksum: self.checksum,
            last_synced: synced_at,
        }
    }
}

fn text_field(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("rendered")?.as_str()?,
        _ => return None,
    };
    Some(strip_markup(s).trim().to_string())
}

fn term(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(strip_markup(s).trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("name").and_then(term),
        _ => None,
    }
}

/// Paginated read access to the authoritative catalog.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Human-readable identifier for logs.
    fn name(&self) -> String;

    /// Fetch one page (1-based). `Ok(None)` means the page is past the end
    /// of the collection.
    async fn fetch_page(&self, page: usize) -> Result<Option<RemotePage>, RemoteError>;
}

/// Build the source configured under `[remote]`.
pub fn from_config(config: &RemoteConfig) -> anyhow::Result<Box<dyn RemoteSource>> {
    Ok(match config.kind {
        RemoteKind::Http => Box::new(HttpSource::from_config(config)?),
        RemoteKind::File => Box::new(FileSource::from_config(config)?),
    })
}

/// JSON-over-HTTP collection endpoint (WordPress REST API compatible).
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    per_page: usize,
    total_header: String,
    pages_header: String,
    auth: Option<(String, String)>,
}

impl HttpSource {
    pub fn from_config(config: &RemoteConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("remote.url required for kind 'http'"))?;

        let auth = match (&config.username_env, &config.password_env) {
            (Some(user_var), Some(pass_var)) => {
                let user = std::env::var(user_var).map_err(|_| {
                    anyhow::anyhow!("Environment variable {} is not set", user_var)
                })?;
                let pass = std::env::var(pass_var).map_err(|_| {
                    anyhow::anyhow!("Environment variable {} is not set", pass_var)
                })?;
                Some((user, pass))
            }
            _ => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            per_page: config.per_page,
            total_header: config.total_header.to_lowercase(),
            pages_header: config.pages_header.to_lowercase(),
            auth,
        })
    }

    fn header_count(
        headers: &reqwest::header::HeaderMap,
        name: &str,
    ) -> Result<Option<usize>, RemoteError> {
        let Some(raw) = headers.get(name) else {
            return Ok(None);
        };
        let text = raw
            .to_str()
            .map_err(|_| RemoteError::Malformed(format!("header {} is not text", name)))?;
        text.trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| RemoteError::Malformed(format!("header {} = '{}' is not a count", name, text)))
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    fn name(&self) -> String {
        self.url.clone()
    }

    async fn fetch_page(&self, page: usize) -> Result<Option<RemotePage>, RemoteError> {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("page", page), ("per_page", self.per_page)]);
        if let Some((user, pass)) = &self.auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let status = response.status();

        // WordPress answers 400 (rest_post_invalid_page_number) past the last page
        if status.as_u16() == 400 && page > 1 {
            return Ok(None);
        }
        if status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Transient(format!("HTTP {}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Fatal(format!("HTTP {}: {}", status, body)));
        }

        let declared_count = Self::header_count(response.headers(), &self.total_header)?
            .ok_or_else(|| {
                RemoteError::Malformed(format!("missing {} header", self.total_header))
            })?;
        let total_pages = Self::header_count(response.headers(), &self.pages_header)?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        let items = body
            .as_array()
            .ok_or_else(|| RemoteError::Malformed("expected a JSON array of items".to_string()))?
            .iter()
            .map(RemoteItem::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(RemotePage {
            declared_count,
            total_pages,
            items,
        }))
    }
}

/// A catalog dump on disk: `{ "total": N, "items": [...] }`.
///
/// Served page by page so it exercises the same enumeration path as the
/// HTTP source. `total` is the declared count and may disagree with the
/// number of items.
pub struct FileSource {
    path: PathBuf,
    per_page: usize,
}

#[derive(Deserialize)]
struct Dump {
    total: usize,
    items: Vec<Value>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, per_page: usize) -> Self {
        Self {
            path: path.into(),
            per_page: per_page.max(1),
        }
    }

    pub fn from_config(config: &RemoteConfig) -> anyhow::Result<Self> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("remote.path required for kind 'file'"))?;
        Ok(Self::new(path, config.per_page))
    }
}

#[async_trait]
impl RemoteSource for FileSource {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn fetch_page(&self, page: usize) -> Result<Option<RemotePage>, RemoteError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| RemoteError::Fatal(format!("{}: {}", self.path.display(), e)))?;
        let dump: Dump =
            serde_json::from_slice(&bytes).map_err(|e| RemoteError::Malformed(e.to_string()))?;

        let total_pages = dump.items.len().div_ceil(self.per_page);
        if page == 0 || (page > total_pages && page > 1) {
            return Ok(None);
        }
        let start = (page - 1) * self.per_page;
        let end = (start + self.per_page).min(dump.items.len());
        let items = dump.items[start.min(end)..end]
            .iter()
            .map(RemoteItem::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(RemotePage {
            declared_count: dump.total,
            total_pages: Some(total_pages.max(1)),
            items,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_item_from_wordpress_json() {
        let v = json!({
            "id": 42,
            "title": {"rendered": "Hot &amp; Oily Massage - Watch Now"},
            "excerpt": {"rendered": "<p>A relaxing session</p>"},
            "tags": ["massage", 17],
            "categories": [3]
        });
        let item = RemoteItem::from_json(&v).unwrap();
        assert_eq!(item.id, "42");
        assert_eq!(item.title, "Hot & Oily Massage - Watch Now");
        assert_eq!(item.description, "A relaxing session");
        assert_eq!(item.tags, vec!["massage", "17"]);
        assert_eq!(item.category.as_deref(), Some("3"));
        assert_eq!(item.checksum.len(), 64);
    }

    #[test]
    fn test_item_requires_id() {
        let err = RemoteItem::from_json(&json!({"title": "x"})).unwrap_err();
        assert!(matches!(err, RemoteError::Malformed(_)));
    }

    #[test]
    fn test_checksum_tracks_payload() {
        let a = RemoteItem::from_json(&json!({"id": "a", "title": "one"})).unwrap();
        let b = RemoteItem::from_json(&json!({"id": "a", "title": "two"})).unwrap();
        let a2 = RemoteItem::from_json(&json!({"title": "one", "id": "a"})).unwrap();
        assert_ne!(a.checksum, b.checksum);
        assert_eq!(a.checksum, a2.checksum);
    }

    #[tokio::test]
    async fn test_file_source_pages() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dump.json");
        let items: Vec<Value> = (1..=5).map(|i| json!({"id": i, "title": "t"})).collect();
        std::fs::write(&path, json!({"total": 5, "items": items}).to_string()).unwrap();

        let source = FileSource::new(&path, 2);
        let p1 = source.fetch_page(1).await.unwrap().unwrap();
        assert_eq!(p1.declared_count, 5);
        assert_eq!(p1.total_pages, Some(3));
        assert_eq!(p1.items.len(), 2);
        let p3 = source.fetch_page(3).await.unwrap().unwrap();
        assert_eq!(p3.items.len(), 1);
        assert_eq!(p3.items[0].id, "5");
        assert!(source.fetch_page(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_source_missing_file_is_fatal() {
        let source = FileSource::new("/nonexistent/dump.json", 10);
        let err = source.fetch_page(1).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
