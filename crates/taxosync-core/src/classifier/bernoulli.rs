//! Bernoulli naive Bayes over token presence.
//!
//! Each vocabulary term is a binary feature. For class `c` with `n_c`
//! documents, of which `df` contain term `t`:
//!
//! ```text
//! p(t | c) = (df + α) / (n_c + 2α)
//! log P(d | c) = Σ_t∈V [ x_t · ln p + (1 - x_t) · ln(1 - p) ]
//! ```
//!
//! The absent-term sum is precomputed per class (`absent_base`), so scoring
//! only walks the terms actually present in the input.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{best_posterior, Classifier, Dataset};
use crate::features::TokenFeatures;
use crate::models::{Algorithm, Prediction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BernoulliNb {
    pub vocabulary: BTreeSet<String>,
    pub classes: BTreeMap<String, BernoulliClass>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BernoulliClass {
    pub log_prior: f64,
    /// `Σ_t ln(1 - p(t|c))` over the whole vocabulary.
    pub absent_base: f64,
    /// `ln p(t|c) - ln(1 - p(t|c))` per vocabulary term.
    pub present_delta: BTreeMap<String, f64>,
}

impl BernoulliNb {
    pub fn train(dataset: &Dataset, alpha: f64) -> Self {
        let vocabulary: BTreeSet<String> = dataset
            .examples
            .iter()
            .flat_map(|ex| ex.features.presence().map(str::to_string))
            .collect();

        let mut doc_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut term_df: BTreeMap<String, BTreeMap<&str, usize>> = BTreeMap::new();
        for ex in &dataset.examples {
            *doc_counts.entry(ex.label.clone()).or_insert(0) += 1;
            let df = term_df.entry(ex.label.clone()).or_default();
            for term in ex.features.presence() {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        let total_docs = dataset.len() as f64;
        let mut classes = BTreeMap::new();
        for (label, n_c) in &doc_counts {
            let df = &term_df[label];
            let mut absent_base = 0.0;
            let mut present_delta = BTreeMap::new();
            for term in &vocabulary {
                let count = df.get(term.as_str()).copied().unwrap_or(0) as f64;
                let p = (count + alpha) / (*n_c as f64 + 2.0 * alpha);
                let ln_absent = (1.0 - p).ln();
                absent_base += ln_absent;
                present_delta.insert(term.clone(), p.ln() - ln_absent);
            }
            classes.insert(
                label.clone(),
                BernoulliClass {
                    log_prior: (*n_c as f64 / total_docs).ln(),
                    absent_base,
                    present_delta,
                },
            );
        }

        Self {
            vocabulary,
            classes,
        }
    }
}

impl Classifier for BernoulliNb {
    fn algorithm(&self) -> Algorithm {
        Algorithm::BernoulliNb
    }

    fn labels(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }

    fn predict(&self, features: &TokenFeatures) -> Option<Prediction> {
        let present: Vec<&str> = features
            .presence()
            .filter(|t| self.vocabulary.contains(*t))
            .collect();
        if present.is_empty() {
            return None;
        }
        let scores: BTreeMap<String, f64> = self
            .classes
            .iter()
            .map(|(label, class)| {
                let delta: f64 = present
                    .iter()
                    .filter_map(|t| class.present_delta.get(*t))
                    .sum();
                (label.clone(), class.log_prior + class.absent_base + delta)
            })
            .collect();
        best_posterior(&scores)
    }
}
