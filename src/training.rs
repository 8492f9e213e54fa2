//! TrainingPipeline: build labeled datasets and (re)train the nine models.
//!
//! For each channel a dataset is assembled from the content store:
//!
//! 1. the latest [`CorrectedLabel`] for (entry, channel), if any;
//! 2. otherwise the entry's catalog category, when
//!    `training.include_catalog_labels` is set.
//!
//! With the flag on (the default), entries still `unclassified` or
//! `auto_suggested` contribute examples through their catalog category.
//! Set it to `false` to train on human labels only.
//!
//! Each (channel, algorithm) key then trains independently on a blocking
//! worker. A key whose dataset is too small or has too few classes is
//! skipped with a warning and its previous artifact stays active. The
//! registry write for each key is atomic; there is no cross-key rollback.
//!
//! | Mode | Trains on | Persists |
//! |------|-----------|----------|
//! | production | 100% of labeled examples | always |
//! | validation | holdout split (every k-th example tested) | only with `--save` |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::task::JoinSet;
use tracing::{info, warn};

use taxosync_core::classifier::{Dataset, Example, TrainOptions};
use taxosync_core::features::{FeatureExtractor, IdfTable};
use taxosync_core::lifecycle::{EntryState, LifecycleEvent};
use taxosync_core::{Algorithm, Channel, ModelKey, ModelParams};

use crate::cancel::CancelFlag;
use crate::config::{Config, TrainingConfig, TrainingMode};
use crate::content_store::{Catalog, ContentStore};
use crate::db;
use crate::feedback::{self, CorrectedLabel};
use crate::lifecycle_store;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::registry::{ModelArtifact, ModelRegistry};

/// What to train.
#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub mode: TrainingMode,
    pub channels: Vec<Channel>,
    pub algorithms: Vec<Algorithm>,
    /// Persist validation-mode models.
    pub save: bool,
}

impl TrainRequest {
    /// Every key, in the configured mode.
    pub fn all(config: &Config) -> Self {
        Self {
            mode: config.training.mode,
            channels: Channel::ALL.to_vec(),
            algorithms: Algorithm::ALL.to_vec(),
            save: false,
        }
    }

    pub fn keys(&self) -> Vec<ModelKey> {
        ModelKey::all()
            .into_iter()
            .filter(|k| self.channels.contains(&k.channel) && self.algorithms.contains(&k.algorithm))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum KeyOutcome {
    Trained {
        accuracy: Option<f64>,
        persisted: bool,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyReport {
    pub channel: Channel,
    pub algorithm: Algorithm,
    pub examples: usize,
    pub classes: usize,
    #[serde(flatten)]
    pub outcome: KeyOutcome,
}

impl KeyReport {
    pub fn key(&self) -> ModelKey {
        ModelKey::new(self.channel, self.algorithm)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub mode: TrainingMode,
    pub keys: Vec<KeyReport>,
    /// Entries moved to `retrainable` by this run.
    pub consumed_entries: usize,
}

impl TrainingReport {
    pub fn trained(&self) -> impl Iterator<Item = &KeyReport> {
        self.keys
            .iter()
            .filter(|k| matches!(k.outcome, KeyOutcome::Trained { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &KeyReport> {
        self.keys
            .iter()
            .filter(|k| matches!(k.outcome, KeyOutcome::Skipped { .. }))
    }
}

/// Labeled examples and corpus statistics for one channel.
#[derive(Debug, Clone)]
pub struct ChannelData {
    pub dataset: Dataset,
    /// Entries whose label came from human feedback.
    pub contributors: BTreeSet<String>,
    /// IDF over every catalog entry's text for the channel, labeled or not.
    pub corpus_idf: IdfTable,
}

pub struct TrainingPipeline {
    settings: TrainingConfig,
    options: TrainOptions,
    extractor: FeatureExtractor,
    cancel: CancelFlag,
}

impl TrainingPipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: config.training.clone(),
            options: config.train_options(),
            extractor: FeatureExtractor::new(&config.feature_options()),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Assemble the labeled dataset for `channel`.
    ///
    /// Entries whose text yields no tokens are left out.
    pub fn build_channel_data(
        &self,
        catalog: &Catalog,
        labels: &BTreeMap<(String, Channel), CorrectedLabel>,
        channel: Channel,
    ) -> ChannelData {
        let mut examples = Vec::new();
        let mut contributors = BTreeSet::new();
        let mut corpus = Vec::with_capacity(catalog.len());

        for entry in &catalog.entries {
            let features = self.extractor.extract(entry, channel);
            if features.is_empty() {
                continue;
            }
            corpus.push(features.clone());

            let human = labels.get(&(entry.id.clone(), channel));
            let label = match human {
                Some(l) => {
                    contributors.insert(entry.id.clone());
                    Some(l.label.clone())
                }
                None if self.settings.include_catalog_labels => entry.category.clone(),
                None => None,
            };
            if let Some(label) = label.filter(|l| !l.trim().is_empty()) {
                examples.push(Example { features, label });
            }
        }

        ChannelData {
            dataset: Dataset::new(examples),
            contributors,
            corpus_idf: IdfTable::fit(&corpus),
        }
    }

    /// Train every requested key and publish results to `registry`.
    pub async fn run(
        &self,
        request: &TrainRequest,
        catalog: &Catalog,
        labels: &BTreeMap<(String, Channel), CorrectedLabel>,
        registry: &ModelRegistry,
        progress: &dyn ProgressReporter,
    ) -> Result<(TrainingReport, BTreeSet<String>)> {
        let keys = request.keys();
        if keys.is_empty() {
            bail!("Nothing to train: no (channel, algorithm) key selected");
        }

        let mut data: BTreeMap<Channel, Arc<ChannelData>> = BTreeMap::new();
        for key in &keys {
            if !data.contains_key(&key.channel) {
                let d = self.build_channel_data(catalog, labels, key.channel);
                data.insert(key.channel, Arc::new(d));
            }
        }

        let mut tasks = JoinSet::new();
        for key in keys.iter().copied() {
            if self.cancel.is_cancelled() {
                bail!("training cancelled");
            }
            let channel_data = Arc::clone(&data[&key.channel]);
            let settings = self.settings.clone();
            let mut options = self.options.clone();
            options.corpus_idf = Some(channel_data.corpus_idf.clone());
            let mode = request.mode;
            tasks.spawn_blocking(move || {
                train_key(key, &channel_data.dataset, mode, &settings, &options)
            });
        }

        let total = keys.len();
        let mut reports = Vec::with_capacity(total);
        let mut consumed_from: BTreeSet<Channel> = BTreeSet::new();
        let mut done = 0;

        while let Some(joined) = tasks.join_next().await {
            let trained = joined?;
            done += 1;
            if self.cancel.is_cancelled() {
                bail!("training cancelled");
            }

            let key = trained.key;
            let outcome = match trained.result {
                Ok((artifact, accuracy)) => {
                    let persist = request.mode == TrainingMode::Production || request.save;
                    if persist {
                        registry.replace(artifact)?;
                        if request.mode == TrainingMode::Production {
                            consumed_from.insert(key.channel);
                        }
                    }
                    info!(
                        key = %key,
                        examples = trained.examples,
                        accuracy = ?accuracy,
                        persisted = persist,
                        "model trained"
                    );
                    KeyOutcome::Trained {
                        accuracy,
                        persisted: persist,
                    }
                }
                Err(reason) => {
                    warn!(key = %key, reason = %reason, "skipping key, previous artifact stays active");
                    KeyOutcome::Skipped { reason }
                }
            };

            progress.report(ProgressEvent::Training {
                key: key.to_string(),
                n: done,
                total,
                outcome: match &outcome {
                    KeyOutcome::Trained { .. } => "trained",
                    KeyOutcome::Skipped { .. } => "skipped",
                },
            });

            reports.push(KeyReport {
                channel: key.channel,
                algorithm: key.algorithm,
                examples: trained.examples,
                classes: trained.classes,
                outcome,
            });
        }

        reports.sort_by_key(|r| r.key());
        let consumed: BTreeSet<String> = consumed_from
            .iter()
            .flat_map(|c| data[c].contributors.iter().cloned())
            .collect();

        Ok((
            TrainingReport {
                mode: request.mode,
                keys: reports,
                consumed_entries: 0,
            },
            consumed,
        ))
    }
}

struct TrainedKey {
    key: ModelKey,
    examples: usize,
    classes: usize,
    result: std::result::Result<(ModelArtifact, Option<f64>), String>,
}

fn train_key(
    key: ModelKey,
    dataset: &Dataset,
    mode: TrainingMode,
    settings: &TrainingConfig,
    options: &TrainOptions,
) -> TrainedKey {
    TrainedKey {
        key,
        examples: dataset.len(),
        classes: dataset.class_counts().len(),
        result: fit_key(key, dataset, mode, settings, options),
    }
}

fn fit_key(
    key: ModelKey,
    dataset: &Dataset,
    mode: TrainingMode,
    settings: &TrainingConfig,
    options: &TrainOptions,
) -> std::result::Result<(ModelArtifact, Option<f64>), String> {
    dataset
        .check_sufficient(settings.min_examples, settings.min_classes)
        .map_err(|e| e.to_string())?;

    let (train_set, test_set) = match mode {
        TrainingMode::Production => (dataset.clone(), Dataset::default()),
        TrainingMode::Validation => dataset.split(settings.holdout_ratio),
    };
    train_set
        .check_sufficient(1, settings.min_classes)
        .map_err(|e| format!("training split: {}", e))?;

    let params =
        ModelParams::train(key.algorithm, &train_set, options).map_err(|e| e.to_string())?;
    let accuracy = (!test_set.is_empty()).then(|| params.accuracy(&test_set));
    let artifact = ModelArtifact {
        key,
        params,
        training_set_size: train_set.len(),
        trained_at: Utc::now(),
        mode,
        accuracy,
    };
    Ok((artifact, accuracy))
}

/// Load inputs, train, and advance the lifecycle of consumed entries.
pub async fn run_train(
    config: &Config,
    request: &TrainRequest,
    cancel: CancelFlag,
    progress: &dyn ProgressReporter,
) -> Result<TrainingReport> {
    let store = ContentStore::from_config(config);
    let catalog = store.load_or_default()?;
    if catalog.is_empty() {
        warn!(path = %store.path().display(), "content store is empty; run `taxo sync` first");
    }

    let pool = db::open(config).await?;
    let labels = feedback::latest_labels(&pool).await?;
    let registry = ModelRegistry::open(&config.registry.dir)?;

    let pipeline = TrainingPipeline::new(config).with_cancel(cancel);
    let (mut report, consumed) = pipeline
        .run(request, &catalog, &labels, &registry, progress)
        .await?;
    registry.flush()?;

    report.consumed_entries = consume(&pool, &consumed).await?;
    pool.close().await;
    Ok(report)
}

/// Move pending human-labeled entries used by a production run to
/// `retrainable`.
async fn consume(pool: &SqlitePool, used: &BTreeSet<String>) -> Result<usize> {
    if used.is_empty() {
        return Ok(0);
    }
    let pending = lifecycle_store::entries_where(pool, EntryState::is_pending_training).await?;
    let mut n = 0;
    for id in pending.iter().filter(|id| used.contains(*id)) {
        lifecycle_store::transition(pool, id, LifecycleEvent::Consumed).await?;
        n += 1;
    }
    Ok(n)
}
