//! Model registry: one active artifact per (channel, algorithm) key.
//!
//! Artifacts live as JSON files named by key (`title.bernoulli-nb.json`,
//! ...) in the registry directory. The registry is opened once per process,
//! loading every artifact present, and handed to the training and
//! classification runners.
//!
//! Replacing an artifact is atomic per key: the new file is fully written
//! and synced before it is renamed over the old one, under a per-key lock
//! file. There is no cross-key transaction; after a partial retrain, keys
//! that were not retrained keep their previous artifact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use taxosync_core::{Classifier, CoreError, ModelKey, ModelParams};

use crate::atomic::{with_exclusive_lock, write_atomic};
use crate::config::TrainingMode;
use crate::error::RegistryWriteError;

/// A trained model plus its training metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub key: ModelKey,
    pub params: ModelParams,
    pub training_set_size: usize,
    pub trained_at: DateTime<Utc>,
    pub mode: TrainingMode,
    /// Holdout accuracy, present for validation runs.
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl ModelArtifact {
    /// The parameters must belong to the key's algorithm.
    pub fn check(&self) -> Result<(), CoreError> {
        let found = self.params.algorithm();
        if found != self.key.algorithm {
            return Err(CoreError::ModelMismatch {
                expected: self.key.algorithm.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }
}

pub struct ModelRegistry {
    dir: PathBuf,
    active: RwLock<BTreeMap<ModelKey, Arc<ModelArtifact>>>,
}

impl ModelRegistry {
    /// Open the registry at `dir`, loading every persisted artifact.
    ///
    /// Unreadable or mismatched artifact files are skipped with a warning;
    /// their key behaves as untrained until the next successful retrain.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create registry dir: {}", dir.display()))?;

        let mut active = BTreeMap::new();
        for key in ModelKey::all() {
            let path = artifact_path(&dir, &key);
            if !path.exists() {
                continue;
            }
            match load_artifact(&path, &key) {
                Ok(artifact) => {
                    debug!(key = %key, "loaded model artifact");
                    active.insert(key, Arc::new(artifact));
                }
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable model artifact"),
            }
        }
        info!(dir = %dir.display(), artifacts = active.len(), "model registry opened");

        Ok(Self {
            dir,
            active: RwLock::new(active),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, key: &ModelKey) -> Option<Arc<ModelArtifact>> {
        self.read().get(key).cloned()
    }

    /// Active artifacts in key order.
    pub fn artifacts(&self) -> Vec<Arc<ModelArtifact>> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Persist `artifact` and make it the active one for its key.
    ///
    /// On failure the previous artifact stays active, both on disk and in
    /// memory.
    pub fn replace(&self, artifact: ModelArtifact) -> Result<(), RegistryWriteError> {
        let key = artifact.key;
        let fail = |source: std::io::Error| RegistryWriteError { key, source };

        artifact
            .check()
            .map_err(|e| fail(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let bytes = serde_json::to_vec(&artifact).map_err(|e| fail(std::io::Error::other(e)))?;

        let path = artifact_path(&self.dir, &key);
        let lock = self.dir.join(format!("{}.lock", key.file_stem()));
        with_exclusive_lock(&lock, || Ok(write_atomic(&path, &bytes)?)).map_err(|e| {
            match e.downcast::<std::io::Error>() {
                Ok(io) => fail(io),
                Err(other) => fail(std::io::Error::other(other.to_string())),
            }
        })?;

        debug!(key = %key, size = artifact.training_set_size, "model artifact replaced");
        self.write().insert(key, Arc::new(artifact));
        Ok(())
    }

    /// Make completed replacements durable.
    pub fn flush(&self) -> Result<()> {
        #[cfg(unix)]
        {
            std::fs::File::open(&self.dir)
                .and_then(|d| d.sync_all())
                .with_context(|| format!("Failed to sync registry dir: {}", self.dir.display()))?;
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ModelKey, Arc<ModelArtifact>>> {
        self.active.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ModelKey, Arc<ModelArtifact>>> {
        self.active.write().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn artifact_path(dir: &Path, key: &ModelKey) -> PathBuf {
    dir.join(format!("{}.json", key.file_stem()))
}

fn load_artifact(path: &Path, key: &ModelKey) -> Result<ModelArtifact> {
    let bytes = std::fs::read(path)?;
    let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;
    if artifact.key != *key {
        anyhow::bail!("file holds artifact for {}", artifact.key);
    }
    artifact.check()?;
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxosync_core::classifier::{Dataset, Example, TrainOptions};
    use taxosync_core::features::FeatureExtractor;
    use taxosync_core::{Algorithm, Channel};
    use tempfile::TempDir;

    fn dataset() -> Dataset {
        let ex = FeatureExtractor::default();
        let rows = [
            ("oil massage", "Massage"),
            ("spa massage", "Massage"),
            ("beach walk", "Outdoor"),
            ("forest hike", "Outdoor"),
        ];
        Dataset::new(
            rows.iter()
                .map(|(t, l)| Example {
                    features: ex.extract_text(t, Channel::Title),
                    label: l.to_string(),
                })
                .collect(),
        )
    }

    fn artifact(key: ModelKey) -> ModelArtifact {
        let ds = dataset();
        ModelArtifact {
            key,
            params: ModelParams::train(key.algorithm, &ds, &TrainOptions::default()).unwrap(),
            training_set_size: ds.len(),
            trained_at: Utc::now(),
            mode: TrainingMode::Production,
            accuracy: None,
        }
    }

    #[test]
    fn test_replace_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let key = ModelKey::new(Channel::Title, Algorithm::MultinomialNb);
        let reg = ModelRegistry::open(tmp.path()).unwrap();
        assert!(reg.is_empty());
        reg.replace(artifact(key)).unwrap();
        reg.flush().unwrap();
        assert!(artifact_path(tmp.path(), &key).exists());

        let reopened = ModelRegistry::open(tmp.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(*reopened.get(&key).unwrap(), *reg.get(&key).unwrap());
    }

    #[test]
    fn test_artifact_mode_is_stored_lowercase() {
        let tmp = TempDir::new().unwrap();
        let key = ModelKey::new(Channel::Description, Algorithm::BernoulliNb);
        let reg = ModelRegistry::open(tmp.path()).unwrap();
        let mut a = artifact(key);
        a.mode = TrainingMode::Validation;
        reg.replace(a).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(artifact_path(tmp.path(), &key)).unwrap()).unwrap();
        assert_eq!(raw["mode"], "validation");
        let reopened = ModelRegistry::open(tmp.path()).unwrap();
        assert_eq!(reopened.get(&key).unwrap().mode, TrainingMode::Validation);
    }

    #[test]
    fn test_reloaded_model_predicts_identically() {
        let tmp = TempDir::new().unwrap();
        let key = ModelKey::new(Channel::Title, Algorithm::TfidfCentroid);
        let reg = ModelRegistry::open(tmp.path()).unwrap();
        reg.replace(artifact(key)).unwrap();
        let probe = FeatureExtractor::default().extract_text("massage on the beach", Channel::Title);
        let before = reg.get(&key).unwrap().params.predict(&probe);

        let reopened = ModelRegistry::open(tmp.path()).unwrap();
        assert_eq!(reopened.get(&key).unwrap().params.predict(&probe), before);
    }

    #[test]
    fn test_replace_only_touches_its_key() {
        let tmp = TempDir::new().unwrap();
        let a = ModelKey::new(Channel::Tags, Algorithm::BernoulliNb);
        let b = ModelKey::new(Channel::Tags, Algorithm::MultinomialNb);
        let reg = ModelRegistry::open(tmp.path()).unwrap();
        reg.replace(artifact(a)).unwrap();
        reg.replace(artifact(b)).unwrap();
        let b_bytes = std::fs::read(artifact_path(tmp.path(), &b)).unwrap();

        reg.replace(artifact(a)).unwrap();
        assert_eq!(std::fs::read(artifact_path(tmp.path(), &b)).unwrap(), b_bytes);
    }

    #[test]
    fn test_mismatched_artifact_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let reg = ModelRegistry::open(tmp.path()).unwrap();
        let mut bad = artifact(ModelKey::new(Channel::Title, Algorithm::BernoulliNb));
        bad.key = ModelKey::new(Channel::Title, Algorithm::TfidfCentroid);
        let err = reg.replace(bad).unwrap_err();
        assert_eq!(err.key.algorithm, Algorithm::TfidfCentroid);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_skipped_on_open() {
        let tmp = TempDir::new().unwrap();
        let key = ModelKey::new(Channel::Description, Algorithm::BernoulliNb);
        std::fs::write(artifact_path(tmp.path(), &key), b"{\"key\":").unwrap();
        let reg = ModelRegistry::open(tmp.path()).unwrap();
        assert!(reg.get(&key).is_none());
    }

    #[test]
    fn test_write_failure_keeps_previous_artifact() {
        let tmp = TempDir::new().unwrap();
        let key = ModelKey::new(Channel::Title, Algorithm::BernoulliNb);
        let reg = ModelRegistry::open(tmp.path()).unwrap();
        reg.replace(artifact(key)).unwrap();
        let before = reg.get(&key).unwrap();

        // A directory squatting on the artifact path makes the rename fail
        let path = artifact_path(tmp.path(), &key);
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        let mut next = artifact(key);
        next.training_set_size = 99;
        let err = reg.replace(next).unwrap_err();
        assert_eq!(err.key, key);
        assert_eq!(reg.get(&key).unwrap(), before);
    }
}
