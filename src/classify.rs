//! EnsembleClassifier: run every active model over an entry and vote.
//!
//! Only models present in the registry are invoked; a channel with no
//! trained model abstains. [`EnsembleClassifier::classify`] is a pure
//! function of the entry, the loaded artifacts, and the ensemble policy.
//! [`EnsembleClassifier::classify_and_record`] additionally writes the
//! audit trail and advances the entry's lifecycle.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use taxosync_core::ensemble::{
    combine_channel, combine_channels, EnsemblePolicy, ModelVote, TaxonomySuggestion,
};
use taxosync_core::features::FeatureExtractor;
use taxosync_core::lifecycle::{EntryState, LifecycleEvent};
use taxosync_core::{Algorithm, Channel, Classifier, ContentEntry, ModelKey};

use crate::audit;
use crate::config::Config;
use crate::lifecycle_store;
use crate::registry::ModelRegistry;

pub struct EnsembleClassifier<'a> {
    registry: &'a ModelRegistry,
    extractor: FeatureExtractor,
    policy: EnsemblePolicy,
}

impl<'a> EnsembleClassifier<'a> {
    pub fn new(registry: &'a ModelRegistry, config: &Config) -> Self {
        Self {
            registry,
            extractor: FeatureExtractor::new(&config.feature_options()),
            policy: config.ensemble_policy(),
        }
    }

    /// Classify one entry without side effects.
    pub fn classify(&self, entry: &ContentEntry) -> TaxonomySuggestion {
        let channels = Channel::ALL
            .iter()
            .map(|channel| {
                let features = self.extractor.extract(entry, *channel);
                let votes: Vec<ModelVote> = Algorithm::ALL
                    .iter()
                    .filter_map(|algorithm| {
                        let artifact = self.registry.get(&ModelKey::new(*channel, *algorithm))?;
                        Some(ModelVote {
                            algorithm: *algorithm,
                            prediction: artifact.params.predict(&features),
                        })
                    })
                    .collect();
                combine_channel(*channel, votes, &self.policy)
            })
            .collect();
        combine_channels(&entry.id, channels, &self.policy)
    }

    /// Classify, append the audit records, and mark the entry suggested.
    ///
    /// Human labels are never demoted: an entry that is already confirmed
    /// or corrected keeps its state.
    pub async fn classify_and_record(
        &self,
        pool: &SqlitePool,
        entry: &ContentEntry,
    ) -> Result<TaxonomySuggestion> {
        if self.registry.is_empty() {
            bail!("No trained models in {}; run `taxo train` first", self.registry.dir().display());
        }
        let suggestion = self.classify(entry);
        audit::append(pool, &suggestion).await?;

        if suggestion.is_fallback() {
            warn!(id = %entry.id, label = %suggestion.label, "no channel produced a prediction");
        } else {
            let state = lifecycle_store::transition(pool, &entry.id, LifecycleEvent::Suggested).await?;
            debug!(id = %entry.id, state = %state, "entry suggested");
            if suggestion.low_confidence {
                warn!(
                    id = %entry.id,
                    label = %suggestion.label,
                    confidence = suggestion.confidence,
                    "low-confidence suggestion"
                );
            }
        }
        Ok(suggestion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_store::testing::entry;
    use crate::db::testing::memory_pool;
    use crate::registry::ModelArtifact;
    use chrono::Utc;
    use taxosync_core::classifier::{Dataset, Example, TrainOptions};
    use taxosync_core::ensemble::Decision;
    use taxosync_core::ModelParams;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> Config {
        let toml = format!(
            "[store]\npath = \"{0}/c.json\"\n[registry]\ndir = \"{0}/models\"\n[db]\npath = \"{0}/t.sqlite\"\n",
            tmp.path().display()
        );
        Config::from_toml_str(&toml).unwrap()
    }

    fn train(registry: &ModelRegistry, config: &Config, channels: &[Channel]) {
        let extractor = FeatureExtractor::new(&config.feature_options());
        let rows = [
            ("oil massage spa", "Massage"),
            ("asian massage", "Massage"),
            ("beach sunset", "Outdoor"),
            ("forest hike", "Outdoor"),
        ];
        for channel in channels {
            let ds = Dataset::new(
                rows.iter()
                    .map(|(t, l)| Example {
                        features: extractor.extract_text(t, *channel),
                        label: l.to_string(),
                    })
                    .collect(),
            );
            for algorithm in Algorithm::ALL {
                let key = ModelKey::new(*channel, algorithm);
                registry
                    .replace(ModelArtifact {
                        key,
                        params: ModelParams::train(algorithm, &ds, &TrainOptions::default()).unwrap(),
                        training_set_size: ds.len(),
                        trained_at: Utc::now(),
                        mode: crate::config::TrainingMode::Production,
                        accuracy: None,
                    })
                    .unwrap();
            }
        }
    }

    fn massage_entry() -> ContentEntry {
        let mut e = entry("42", "Relaxing oil massage", &["massage", "spa"], None);
        e.description = "An asian massage with oil".to_string();
        e
    }

    #[test]
    fn test_all_channels_agree() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let registry = ModelRegistry::open(&cfg.registry.dir).unwrap();
        train(&registry, &cfg, &Channel::ALL);

        let s = EnsembleClassifier::new(&registry, &cfg).classify(&massage_entry());
        assert_eq!(s.label, "Massage");
        assert_eq!(s.decision, Decision::Majority);
        assert_eq!(s.channels.len(), 3);
        assert!(s.channels.iter().all(|c| c.votes.len() == 3));
        assert!(s.confidence > 0.0 && s.confidence <= 1.0);
    }

    #[test]
    fn test_missing_models_are_not_invoked() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let registry = ModelRegistry::open(&cfg.registry.dir).unwrap();
        train(&registry, &cfg, &[Channel::Title]);

        let s = EnsembleClassifier::new(&registry, &cfg).classify(&massage_entry());
        assert_eq!(s.label, "Massage");
        let tags = s.channel(Channel::Tags).unwrap();
        assert!(tags.votes.is_empty());
        assert_eq!(tags.decision, Decision::Abstained);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let registry = ModelRegistry::open(&cfg.registry.dir).unwrap();
        train(&registry, &cfg, &Channel::ALL);
        let c = EnsembleClassifier::new(&registry, &cfg);
        assert_eq!(c.classify(&massage_entry()), c.classify(&massage_entry()));
    }

    #[test]
    fn test_empty_entry_gets_fallback() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let registry = ModelRegistry::open(&cfg.registry.dir).unwrap();
        train(&registry, &cfg, &Channel::ALL);
        let mut empty = entry("9", "", &[], None);
        empty.description.clear();
        let s = EnsembleClassifier::new(&registry, &cfg).classify(&empty);
        assert!(s.is_fallback());
        assert_eq!(s.label, "unclassified");
        assert_eq!(s.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_record_writes_audit_and_state() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let registry = ModelRegistry::open(&cfg.registry.dir).unwrap();
        train(&registry, &cfg, &Channel::ALL);
        let pool = memory_pool().await;

        let c = EnsembleClassifier::new(&registry, &cfg);
        c.classify_and_record(&pool, &massage_entry()).await.unwrap();
        assert_eq!(audit::record_count(&pool).await.unwrap(), 9);
        assert_eq!(
            lifecycle_store::get_state(&pool, "42").await.unwrap(),
            EntryState::AutoSuggested
        );
    }

    #[tokio::test]
    async fn test_record_keeps_human_label() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let registry = ModelRegistry::open(&cfg.registry.dir).unwrap();
        train(&registry, &cfg, &Channel::ALL);
        let pool = memory_pool().await;
        lifecycle_store::transition(&pool, "42", LifecycleEvent::Corrected)
            .await
            .unwrap();

        EnsembleClassifier::new(&registry, &cfg)
            .classify_and_record(&pool, &massage_entry())
            .await
            .unwrap();
        assert_eq!(
            lifecycle_store::get_state(&pool, "42").await.unwrap(),
            EntryState::UserCorrected
        );
    }

    #[tokio::test]
    async fn test_record_without_models_fails() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp);
        let registry = ModelRegistry::open(&cfg.registry.dir).unwrap();
        let pool = memory_pool().await;
        let err = EnsembleClassifier::new(&registry, &cfg)
            .classify_and_record(&pool, &massage_entry())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("taxo train"));
        assert_eq!(audit::record_count(&pool).await.unwrap(), 0);
    }
}
