//! Multinomial naive Bayes over token frequencies.
//!
//! ```text
//! p(t | c) = (count(t, c) + α) / (Σ count(·, c) + α·|V|)
//! log P(d | c) = ln P(c) + Σ_t tf(t, d) · ln p(t | c)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{best_posterior, Classifier, Dataset};
use crate::features::TokenFeatures;
use crate::models::{Algorithm, Prediction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultinomialNb {
    pub classes: BTreeMap<String, MultinomialClass>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultinomialClass {
    pub log_prior: f64,
    pub log_likelihood: BTreeMap<String, f64>,
}

impl MultinomialNb {
    pub fn train(dataset: &Dataset, alpha: f64) -> Self {
        let mut vocabulary: BTreeMap<&str, ()> = BTreeMap::new();
        let mut doc_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut term_counts: BTreeMap<String, BTreeMap<&str, u64>> = BTreeMap::new();

        for ex in &dataset.examples {
            *doc_counts.entry(ex.label.clone()).or_insert(0) += 1;
            let counts = term_counts.entry(ex.label.clone()).or_default();
            for (term, n) in &ex.features.counts {
                vocabulary.insert(term.as_str(), ());
                *counts.entry(term.as_str()).or_insert(0) += *n as u64;
            }
        }

        let vocab_size = vocabulary.len() as f64;
        let total_docs = dataset.len() as f64;
        let mut classes = BTreeMap::new();
        for (label, n_c) in &doc_counts {
            let counts = &term_counts[label];
            let total: u64 = counts.values().sum();
            let denom = total as f64 + alpha * vocab_size;
            let log_likelihood = vocabulary
                .keys()
                .map(|term| {
                    let c = counts.get(term).copied().unwrap_or(0) as f64;
                    (term.to_string(), ((c + alpha) / denom).ln())
                })
                .collect();
            classes.insert(
                label.clone(),
                MultinomialClass {
                    log_prior: (*n_c as f64 / total_docs).ln(),
                    log_likelihood,
                },
            );
        }

        Self { classes }
    }
}

impl Classifier for MultinomialNb {
    fn algorithm(&self) -> Algorithm {
        Algorithm::MultinomialNb
    }

    fn labels(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }

    fn predict(&self, features: &TokenFeatures) -> Option<Prediction> {
        let first = self.classes.values().next()?;
        let known: Vec<(&String, u32)> = features
            .counts
            .iter()
            .filter(|(t, _)| first.log_likelihood.contains_key(*t))
            .map(|(t, n)| (t, *n))
            .collect();
        if known.is_empty() {
            return None;
        }
        let scores: BTreeMap<String, f64> = self
            .classes
            .iter()
            .map(|(label, class)| {
                let ll: f64 = known
                    .iter()
                    .map(|(t, n)| *n as f64 * class.log_likelihood[*t])
                    .sum();
                (label.clone(), class.log_prior + ll)
            })
            .collect();
        best_posterior(&scores)
    }
}
