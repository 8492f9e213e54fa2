//! Configuration parsing and validation.
//!
//! Taxosync is configured via a TOML file (default: `config/taxo.toml`).
//! Every recognized option is enumerated here; the resulting [`Config`] is
//! immutable and validated once at load time.
//!
//! # Example
//!
//! ```toml
//! [store]
//! path = "./data/catalog.json"
//!
//! [registry]
//! dir = "./data/models"
//!
//! [db]
//! path = "./data/taxo.sqlite"
//!
//! [remote]
//! kind = "http"
//! url = "https://example.com/wp-json/wp/v2/posts"
//! per_page = 100
//!
//! [training]
//! mode = "production"
//!
//! [ensemble]
//! tie_break_channel = "tags"
//! min_confidence = 0.4
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use taxosync_core::classifier::TrainOptions;
use taxosync_core::ensemble::EnsemblePolicy;
use taxosync_core::features::FeatureOptions;
use taxosync_core::Channel;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub db: DbConfig,
    /// Only required by `taxo sync`.
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    Http,
    File,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub kind: RemoteKind,
    /// Collection endpoint for `kind = "http"`.
    #[serde(default)]
    pub url: Option<String>,
    /// JSON dump for `kind = "file"`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
    #[serde(default = "default_total_header")]
    pub total_header: String,
    #[serde(default = "default_pages_header")]
    pub pages_header: String,
    /// Environment variable holding the basic-auth user name.
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable holding the basic-auth password.
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_per_page() -> usize {
    100
}
fn default_total_header() -> String {
    "x-wp-total".to_string()
}
fn default_pages_header() -> String {
    "x-wp-totalpages".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub extra_stop_words: Vec<String>,
    #[serde(default = "default_true")]
    pub strip_title_suffix: bool,
    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            extra_stop_words: Vec::new(),
            strip_title_suffix: true,
            min_token_len: 1,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_min_token_len() -> usize {
    1
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrainingMode {
    /// Hold out a test split and report accuracy.
    Validation,
    /// Train on every labeled example and publish to the registry.
    Production,
}

impl TrainingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingMode::Validation => "validation",
            TrainingMode::Production => "production",
        }
    }
}

impl std::fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for TrainingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "validation" => Ok(TrainingMode::Validation),
            "production" => Ok(TrainingMode::Production),
            other => bail!(
                "Unknown training mode: '{}'. Must be validation or production.",
                other
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrainingConfig {
    #[serde(default = "default_mode")]
    pub mode: TrainingMode,
    #[serde(default = "default_holdout_ratio")]
    pub holdout_ratio: f64,
    #[serde(default = "default_min_examples")]
    pub min_examples: usize,
    #[serde(default = "default_min_classes")]
    pub min_classes: usize,
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    /// Use the catalog's own category as a base label for every channel.
    #[serde(default = "default_true")]
    pub include_catalog_labels: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            holdout_ratio: default_holdout_ratio(),
            min_examples: default_min_examples(),
            min_classes: default_min_classes(),
            smoothing: default_smoothing(),
            include_catalog_labels: true,
        }
    }
}

fn default_mode() -> TrainingMode {
    TrainingMode::Production
}
fn default_holdout_ratio() -> f64 {
    0.2
}
fn default_min_examples() -> usize {
    4
}
fn default_min_classes() -> usize {
    2
}
fn default_smoothing() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnsembleConfig {
    #[serde(default = "default_tie_break")]
    pub tie_break_channel: Channel,
    #[serde(default)]
    pub min_confidence: f64,
    #[serde(default = "default_fallback_label")]
    pub fallback_label: String,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            tie_break_channel: default_tie_break(),
            min_confidence: 0.0,
            fallback_label: default_fallback_label(),
        }
    }
}

fn default_tie_break() -> Channel {
    Channel::Tags
}
fn default_fallback_label() -> String {
    "unclassified".to_string()
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Config> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(remote) = &self.remote {
            if remote.per_page == 0 {
                bail!("remote.per_page must be > 0");
            }
            match remote.kind {
                RemoteKind::Http if remote.url.as_deref().unwrap_or("").is_empty() => {
                    bail!("remote.url must be set when kind is 'http'")
                }
                RemoteKind::File if remote.path.is_none() => {
                    bail!("remote.path must be set when kind is 'file'")
                }
                _ => {}
            }
            if remote.username_env.is_some() != remote.password_env.is_some() {
                bail!("remote.username_env and remote.password_env must be set together");
            }
        }

        if self.features.min_token_len == 0 {
            bail!("features.min_token_len must be >= 1");
        }

        let t = &self.training;
        if t.holdout_ratio.is_nan() || t.holdout_ratio <= 0.0 || t.holdout_ratio >= 1.0 {
            bail!("training.holdout_ratio must be in (0.0, 1.0)");
        }
        if t.min_classes < 2 {
            bail!("training.min_classes must be >= 2");
        }
        if t.min_examples < t.min_classes {
            bail!("training.min_examples must be >= training.min_classes");
        }
        if t.smoothing.is_nan() || t.smoothing <= 0.0 {
            bail!("training.smoothing must be > 0");
        }

        if !(0.0..=1.0).contains(&self.ensemble.min_confidence) {
            bail!("ensemble.min_confidence must be in [0.0, 1.0]");
        }
        if self.ensemble.fallback_label.trim().is_empty() {
            bail!("ensemble.fallback_label must not be empty");
        }

        Ok(())
    }

    pub fn feature_options(&self) -> FeatureOptions {
        FeatureOptions {
            extra_stop_words: self.features.extra_stop_words.clone(),
            strip_title_suffix: self.features.strip_title_suffix,
            min_token_len: self.features.min_token_len,
        }
    }

    pub fn ensemble_policy(&self) -> EnsemblePolicy {
        EnsemblePolicy {
            tie_break_channel: self.ensemble.tie_break_channel,
            min_confidence: self.ensemble.min_confidence,
            fallback_label: self.ensemble.fallback_label.clone(),
        }
    }

    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            smoothing: self.training.smoothing,
            corpus_idf: None,
        }
    }

    /// Lock file guarding atomic replacement of the store.
    pub fn store_lock_path(&self) -> PathBuf {
        let mut name = self
            .store
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.store.path.with_file_name(name)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content)
}
