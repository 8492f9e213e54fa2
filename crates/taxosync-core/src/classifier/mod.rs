//! Classifier capability and its three concrete variants.
//!
//! | Variant | Input representation | Module |
//! |---------|----------------------|--------|
//! | Bernoulli naive Bayes | token presence | [`bernoulli`] |
//! | Multinomial naive Bayes | token frequency | [`multinomial`] |
//! | TF-IDF nearest centroid | TF-IDF vector (cosine) | [`centroid`] |
//!
//! Trained parameters are wrapped in [`ModelParams`], the serializable form
//! persisted by the model registry. A `ModelParams` value is itself a
//! [`Classifier`]; reloading one from JSON yields identical predictions.

pub mod bernoulli;
pub mod centroid;
pub mod multinomial;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::features::{IdfTable, TokenFeatures};
use crate::models::{Algorithm, Prediction};

pub use bernoulli::BernoulliNb;
pub use centroid::TfidfCentroid;
pub use multinomial::MultinomialNb;

/// A trained model that maps channel features to a label.
pub trait Classifier: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    /// Class labels known to the model, sorted.
    fn labels(&self) -> Vec<String>;

    /// Predict a label for `features`.
    ///
    /// Returns `None` when the input carries no evidence the model can use
    /// (no token from the training vocabulary).
    fn predict(&self, features: &TokenFeatures) -> Option<Prediction>;
}

/// One labeled example.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub features: TokenFeatures,
    pub label: String,
}

/// A labeled dataset for one (channel, algorithm) key.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub examples: Vec<Example>,
}

impl Dataset {
    pub fn new(examples: Vec<Example>) -> Self {
        Self { examples }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Example count per label.
    pub fn class_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for ex in &self.examples {
            *counts.entry(ex.label.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Check that the dataset can support training.
    pub fn check_sufficient(&self, min_examples: usize, min_classes: usize) -> Result<(), CoreError> {
        if self.examples.len() < min_examples {
            return Err(CoreError::InsufficientData(format!(
                "{} labeled example(s), need at least {}",
                self.examples.len(),
                min_examples
            )));
        }
        let classes = self.class_counts().len();
        if classes < min_classes {
            return Err(CoreError::InsufficientData(format!(
                "{} distinct class(es), need at least {}",
                classes, min_classes
            )));
        }
        Ok(())
    }

    /// Deterministic holdout split: every `k`-th example goes to the test
    /// side, where `k = round(1 / holdout_ratio)`.
    pub fn split(&self, holdout_ratio: f64) -> (Dataset, Dataset) {
        let k = ((1.0 / holdout_ratio).round() as usize).max(2);
        let mut train = Vec::new();
        let mut test = Vec::new();
        for (i, ex) in self.examples.iter().enumerate() {
            if i % k == k - 1 {
                test.push(ex.clone());
            } else {
                train.push(ex.clone());
            }
        }
        (Dataset::new(train), Dataset::new(test))
    }
}

/// Knobs shared by all training algorithms.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Additive (Lidstone) smoothing for the naive Bayes variants.
    pub smoothing: f64,
    /// IDF table fitted on the full channel corpus. When absent, the centroid
    /// classifier fits one on the training examples.
    pub corpus_idf: Option<IdfTable>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            smoothing: 1.0,
            corpus_idf: None,
        }
    }
}

/// Serialized parameters of any classifier variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "kebab-case")]
pub enum ModelParams {
    BernoulliNb(BernoulliNb),
    MultinomialNb(MultinomialNb),
    TfidfCentroid(TfidfCentroid),
}

impl ModelParams {
    /// Train the given algorithm on `dataset`.
    pub fn train(
        algorithm: Algorithm,
        dataset: &Dataset,
        options: &TrainOptions,
    ) -> Result<ModelParams, CoreError> {
        if dataset.is_empty() {
            return Err(CoreError::InsufficientData("empty dataset".to_string()));
        }
        Ok(match algorithm {
            Algorithm::BernoulliNb => {
                ModelParams::BernoulliNb(BernoulliNb::train(dataset, options.smoothing))
            }
            Algorithm::MultinomialNb => {
                ModelParams::MultinomialNb(MultinomialNb::train(dataset, options.smoothing))
            }
            Algorithm::TfidfCentroid => {
                ModelParams::TfidfCentroid(TfidfCentroid::train(dataset, options.corpus_idf.clone()))
            }
        })
    }

    pub fn as_classifier(&self) -> &dyn Classifier {
        match self {
            ModelParams::BernoulliNb(m) => m,
            ModelParams::MultinomialNb(m) => m,
            ModelParams::TfidfCentroid(m) => m,
        }
    }

    /// Fraction of `dataset` predicted correctly. Abstentions count as misses.
    pub fn accuracy(&self, dataset: &Dataset) -> f64 {
        if dataset.is_empty() {
            return 0.0;
        }
        let correct = dataset
            .examples
            .iter()
            .filter(|ex| {
                self.predict(&ex.features)
                    .map(|p| p.label == ex.label)
                    .unwrap_or(false)
            })
            .count();
        correct as f64 / dataset.len() as f64
    }
}

impl Classifier for ModelParams {
    fn algorithm(&self) -> Algorithm {
        self.as_classifier().algorithm()
    }

    fn labels(&self) -> Vec<String> {
        self.as_classifier().labels()
    }

    fn predict(&self, features: &TokenFeatures) -> Option<Prediction> {
        self.as_classifier().predict(features)
    }
}

/// Pick the best class from per-class log scores and turn the scores into a
/// posterior with a numerically stable softmax.
///
/// Ties resolve to the lexicographically smallest label.
pub(crate) fn best_posterior(log_scores: &BTreeMap<String, f64>) -> Option<Prediction> {
    let mut best: Option<(&String, f64)> = None;
    for (label, score) in log_scores {
        match best {
            Some((_, s)) if *score <= s => {}
            _ => best = Some((label, *score)),
        }
    }
    let (label, max) = best?;
    let denom: f64 = log_scores.values().map(|s| (s - max).exp()).sum();
    Some(Prediction {
        label: label.clone(),
        confidence: 1.0 / denom,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::features::FeatureExtractor;
    use crate::models::Channel;

    /// Small two-class corpus used by the variant tests.
    pub fn spa_vs_outdoor() -> Dataset {
        let ex = FeatureExtractor::default();
        let rows = [
            ("hot oil massage relaxing", "Massage"),
            ("asian massage spa session", "Massage"),
            ("deep tissue massage oil", "Massage"),
            ("relaxing spa massage table", "Massage"),
            ("beach sunset outdoor walk", "Outdoor"),
            ("forest hike outdoor adventure", "Outdoor"),
            ("sunset beach picnic", "Outdoor"),
            ("mountain outdoor camping trip", "Outdoor"),
        ];
        Dataset::new(
            rows.iter()
                .map(|(text, label)| Example {
                    features: ex.extract_text(text, Channel::Title),
                    label: label.to_string(),
                })
                .collect(),
        )
    }

    pub fn features(text: &str) -> TokenFeatures {
        FeatureExtractor::default().extract_text(text, Channel::Title)
    }
}
