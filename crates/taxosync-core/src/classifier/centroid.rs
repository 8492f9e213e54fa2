//! Nearest-centroid classifier in TF-IDF space.
//!
//! Each class is represented by the normalized mean of its examples' TF-IDF
//! vectors. A prediction is the class whose centroid has the highest cosine
//! similarity with the input; the similarity itself is the confidence.
//!
//! The IDF table travels with the model, so predictions after a reload use
//! exactly the corpus statistics seen at training time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Classifier, Dataset};
use crate::features::{IdfTable, SparseVector, TokenFeatures};
use crate::models::{Algorithm, Prediction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfCentroid {
    pub idf: IdfTable,
    pub centroids: BTreeMap<String, SparseVector>,
}

impl TfidfCentroid {
    pub fn train(dataset: &Dataset, corpus_idf: Option<IdfTable>) -> Self {
        let idf = corpus_idf
            .unwrap_or_else(|| IdfTable::fit(dataset.examples.iter().map(|ex| &ex.features)));

        let mut sums: BTreeMap<String, SparseVector> = BTreeMap::new();
        for ex in &dataset.examples {
            let v = idf.vectorize(&ex.features);
            let sum = sums.entry(ex.label.clone()).or_default();
            for (term, w) in v.weights {
                *sum.weights.entry(term).or_insert(0.0) += w;
            }
        }

        let centroids = sums
            .into_iter()
            .map(|(label, mut v)| {
                v.normalize();
                (label, v)
            })
            .collect();

        Self { idf, centroids }
    }
}

impl Classifier for TfidfCentroid {
    fn algorithm(&self) -> Algorithm {
        Algorithm::TfidfCentroid
    }

    fn labels(&self) -> Vec<String> {
        self.centroids.keys().cloned().collect()
    }

    fn predict(&self, features: &TokenFeatures) -> Option<Prediction> {
        let query = self.idf.vectorize(features);
        if query.is_zero() {
            return None;
        }
        let mut best: Option<(&String, f64)> = None;
        for (label, centroid) in &self.centroids {
            let sim = query.dot(centroid);
            match best {
                Some((_, s)) if sim <= s => {}
                _ => best = Some((label, sim)),
            }
        }
        let (label, sim) = best?;
        if sim <= 0.0 {
            return None;
        }
        Some(Prediction {
            label: label.clone(),
            confidence: sim.min(1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn test_nearest_centroid() {
        let model = TfidfCentroid::train(&spa_vs_outdoor(), None);
        let p = model.predict(&features("sunset picnic")).unwrap();
        assert_eq!(p.label, "Outdoor");
        assert!(p.confidence > 0.0 && p.confidence <= 1.0);
    }

    #[test]
    fn test_identical_text_to_single_example_class() {
        let ds = Dataset::new(vec![
            super::super::Example {
                features: features("candle wax"),
                label: "Candles".to_string(),
            },
            super::super::Example {
                features: features("yoga mat"),
                label: "Yoga".to_string(),
            },
        ]);
        let model = TfidfCentroid::train(&ds, None);
        let p = model.predict(&features("candle wax")).unwrap();
        assert_eq!(p.label, "Candles");
        assert!((p.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_corpus_idf_is_kept() {
        let corpus = vec![features("massage oil"), features("massage"), features("beach")];
        let idf = IdfTable::fit(&corpus);
        let model = TfidfCentroid::train(&spa_vs_outdoor(), Some(idf.clone()));
        assert_eq!(model.idf, idf);
    }
}
