//! Deterministic text normalization and feature representations.
//!
//! Every channel goes through the same normalization before any model sees
//! it:
//!
//! 1. Strip markup: HTML tags are removed and entities decoded.
//! 2. Optionally trim a `<text> - <suffix>` tail (titles and descriptions
//!    only), since catalog titles carry a call to action after the dash.
//! 3. Lowercase, drop apostrophes, split on anything that is not
//!    alphanumeric.
//! 4. Remove stop-words and tokens shorter than `min_token_len`.
//!
//! Two representation families come out of the normalized tokens:
//!
//! - [`TokenFeatures`] — token counts (presence is `count > 0`), consumed by
//!   the two naive Bayes variants.
//! - [`SparseVector`] — an L2-normalized TF-IDF vector produced by an
//!   [`IdfTable`] fitted on the channel's corpus, consumed by the centroid
//!   classifier.
//!
//! All maps are `BTreeMap`s so iteration order, and therefore every
//! floating-point sum downstream, is identical across runs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{Channel, ContentEntry};

/// English stop-words removed from every channel.
pub const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "ain", "all", "am", "an", "and", "any",
    "are", "aren", "as", "at", "be", "because", "been", "before", "being", "below", "between",
    "both", "but", "by", "can", "couldn", "d", "did", "didn", "do", "does", "doesn", "doing",
    "don", "down", "during", "each", "few", "for", "from", "further", "had", "hadn", "has",
    "hasn", "have", "haven", "having", "he", "her", "here", "hers", "herself", "him", "himself",
    "his", "how", "i", "if", "in", "into", "is", "isn", "it", "its", "itself", "just", "ll", "m",
    "ma", "me", "mightn", "more", "most", "mustn", "my", "myself", "needn", "no", "nor", "not",
    "now", "o", "of", "off", "on", "once", "only", "or", "other", "our", "ours", "ourselves",
    "out", "over", "own", "re", "s", "same", "shan", "she", "should", "shouldn", "so", "some",
    "such", "t", "than", "that", "the", "their", "theirs", "them", "themselves", "then", "there",
    "these", "they", "this", "those", "through", "to", "too", "under", "until", "up", "ve",
    "very", "was", "wasn", "we", "were", "weren", "what", "when", "where", "which", "while",
    "who", "whom", "why", "will", "with", "won", "wouldn", "y", "you", "your", "yours",
    "yourself", "yourselves",
];

/// Options controlling normalization. Built from `[features]` in the config.
#[derive(Debug, Clone)]
pub struct FeatureOptions {
    pub extra_stop_words: Vec<String>,
    pub strip_title_suffix: bool,
    pub min_token_len: usize,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            extra_stop_words: Vec::new(),
            strip_title_suffix: true,
            min_token_len: 1,
        }
    }
}

/// Token counts for one channel of one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFeatures {
    pub counts: BTreeMap<String, u32>,
}

impl TokenFeatures {
    pub fn from_tokens<I: IntoIterator<Item = String>>(tokens: I) -> Self {
        let mut counts = BTreeMap::new();
        for token in tokens {
            *counts.entry(token).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Distinct tokens present.
    pub fn presence(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().map(|c| *c as u64).sum()
    }
}

/// Sparse, L2-normalized vector keyed by term.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub weights: BTreeMap<String, f64>,
}

impl SparseVector {
    pub fn is_zero(&self) -> bool {
        self.weights.values().all(|w| *w == 0.0)
    }

    pub fn norm(&self) -> f64 {
        self.weights.values().map(|w| w * w).sum::<f64>().sqrt()
    }

    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > f64::EPSILON {
            for w in self.weights.values_mut() {
                *w /= norm;
            }
        }
    }

    /// Dot product; equals cosine similarity when both sides are normalized.
    pub fn dot(&self, other: &SparseVector) -> f64 {
        let (small, large) = if self.weights.len() <= other.weights.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .weights
            .iter()
            .filter_map(|(term, w)| large.weights.get(term).map(|o| w * o))
            .sum()
    }
}

/// Inverse document frequencies fitted on one channel's corpus.
///
/// Uses the smoothed form `ln((1 + n) / (1 + df)) + 1`, so every term seen in
/// the corpus keeps a strictly positive weight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdfTable {
    pub documents: usize,
    pub idf: BTreeMap<String, f64>,
}

impl IdfTable {
    pub fn fit<'a, I>(corpus: I) -> Self
    where
        I: IntoIterator<Item = &'a TokenFeatures>,
    {
        let mut df: BTreeMap<String, usize> = BTreeMap::new();
        let mut documents = 0usize;
        for doc in corpus {
            documents += 1;
            for term in doc.presence() {
                *df.entry(term.to_string()).or_insert(0) += 1;
            }
        }
        let n = documents as f64;
        let idf = df
            .into_iter()
            .map(|(term, d)| (term, ((1.0 + n) / (1.0 + d as f64)).ln() + 1.0))
            .collect();
        Self { documents, idf }
    }

    /// TF-IDF vector for `features`. Terms outside the fitted vocabulary are
    /// dropped.
    pub fn vectorize(&self, features: &TokenFeatures) -> SparseVector {
        let mut vector = SparseVector::default();
        for (term, count) in &features.counts {
            if let Some(idf) = self.idf.get(term) {
                vector.weights.insert(term.clone(), *count as f64 * idf);
            }
        }
        vector.normalize();
        vector
    }
}

/// Channel-aware normalizer producing [`TokenFeatures`].
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    stop_words: BTreeSet<String>,
    strip_title_suffix: bool,
    min_token_len: usize,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(&FeatureOptions::default())
    }
}

impl FeatureExtractor {
    pub fn new(options: &FeatureOptions) -> Self {
        let mut stop_words: BTreeSet<String> = STOP_WORDS.iter().map(|s| s.to_string()).collect();
        stop_words.extend(options.extra_stop_words.iter().map(|s| s.to_lowercase()));
        Self {
            stop_words,
            strip_title_suffix: options.strip_title_suffix,
            min_token_len: options.min_token_len.max(1),
        }
    }

    /// Extract token features for one channel of an entry.
    pub fn extract(&self, entry: &ContentEntry, channel: Channel) -> TokenFeatures {
        self.extract_text(&entry.channel_text(channel), channel)
    }

    pub fn extract_text(&self, text: &str, channel: Channel) -> TokenFeatures {
        TokenFeatures::from_tokens(self.tokenize(text, channel))
    }

    /// Normalized tokens in order of appearance.
    pub fn tokenize(&self, text: &str, channel: Channel) -> Vec<String> {
        let mut cleaned = strip_markup(text);
        if self.strip_title_suffix && channel != Channel::Tags {
            cleaned = strip_suffix(&cleaned).to_string();
        }
        let lowered = cleaned.to_lowercase().replace(['\'', '\u{2019}'], "");
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .filter(|t| t.chars().count() >= self.min_token_len)
            .filter(|t| !self.stop_words.contains(*t))
            .map(str::to_string)
            .collect()
    }
}

/// Keep the part before the first ` - ` delimiter, unless that would leave
/// nothing.
fn strip_suffix(text: &str) -> &str {
    match text.split_once(" - ") {
        Some((head, _)) if !head.trim().is_empty() => head.trim(),
        _ => text,
    }
}

/// Remove HTML tags and decode the entities that show up in catalog text.
pub fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            // A bare `<` ("5 < 10") is text, not a tag opener
            '<' if !in_tag && chars.peek().is_some_and(|n| opens_tag(*n)) => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(&out)
}

fn opens_tag(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '/' || c == '!'
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find(';') {
            Some(end) if end <= 10 => {
                let entity = &tail[1..end];
                out.push_str(entity_replacement(entity));
                rest = &tail[end + 1..];
            }
            _ => {
                out.push(' ');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity_replacement(entity: &str) -> &'static str {
    match entity {
        "#8217" | "#039" | "#39" | "apos" | "rsquo" => "'",
        "quot" | "#8220" | "#8221" => "\"",
        "amp" => "&",
        _ => " ",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::default()
    }

    #[test]
    fn test_tokenize_lowercases_and_drops_stop_words() {
        let tokens = extractor().tokenize("The Hot Asian Massage!", Channel::Title);
        assert_eq!(tokens, vec!["hot", "asian", "massage"]);
    }

    #[test]
    fn test_markup_and_entities_removed() {
        let tokens = extractor().tokenize(
            "<p>Oil &amp; candles&#8217; <b>glow</b></p>",
            Channel::Description,
        );
        assert_eq!(tokens, vec!["oil", "candles", "glow"]);
    }

    #[test]
    fn test_bare_angle_bracket_is_text() {
        assert_eq!(strip_markup("5 < 10 stretches"), "5 < 10 stretches");
        assert_eq!(strip_markup("1<2 but <b>3</b>"), "1<2 but  3 ");
        let tokens = extractor().tokenize("calm < loud <em>yoga</em>", Channel::Description);
        assert_eq!(tokens, vec!["calm", "loud", "yoga"]);
    }

    #[test]
    fn test_title_suffix_stripped() {
        let tokens = extractor().tokenize("Sunset yoga - Watch now at Example", Channel::Title);
        assert_eq!(tokens, vec!["sunset", "yoga"]);
    }

    #[test]
    fn test_tags_keep_every_tag() {
        let entry = ContentEntry::from_text(
            "",
            "",
            &["massage".to_string(), "hot oil - spa".to_string()],
        );
        let features = extractor().extract(&entry, Channel::Tags);
        assert_eq!(features.counts.get("spa"), Some(&1));
        assert_eq!(features.counts.get("massage"), Some(&1));
    }

    #[test]
    fn test_extra_stop_words() {
        let ex = FeatureExtractor::new(&FeatureOptions {
            extra_stop_words: vec!["Pornhub".to_string()],
            ..FeatureOptions::default()
        });
        let tokens = ex.tokenize("pornhub exclusive", Channel::Title);
        assert_eq!(tokens, vec!["exclusive"]);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let ex = extractor();
        let a = ex.extract_text("beach beach sunset", Channel::Title);
        let b = ex.extract_text("beach beach sunset", Channel::Title);
        assert_eq!(a, b);
        assert_eq!(a.counts.get("beach"), Some(&2));
        assert_eq!(a.total(), 3);
    }

    #[test]
    fn test_empty_text_yields_empty_features() {
        assert!(extractor().extract_text("", Channel::Title).is_empty());
        assert!(extractor().extract_text("the and of", Channel::Title).is_empty());
    }

    #[test]
    fn test_idf_weights_rare_terms_higher() {
        let ex = extractor();
        let docs = vec![
            ex.extract_text("massage oil", Channel::Title),
            ex.extract_text("massage room", Channel::Title),
            ex.extract_text("massage yoga", Channel::Title),
        ];
        let idf = IdfTable::fit(&docs);
        assert_eq!(idf.documents, 3);
        assert!(idf.idf["oil"] > idf.idf["massage"]);

        let v = idf.vectorize(&docs[0]);
        assert!((v.norm() - 1.0).abs() < 1e-9);
        assert!(v.weights["oil"] > v.weights["massage"]);
    }

    #[test]
    fn test_vectorize_drops_unknown_terms() {
        let ex = extractor();
        let idf = IdfTable::fit(&[ex.extract_text("massage", Channel::Title)]);
        let v = idf.vectorize(&ex.extract_text("unseen words", Channel::Title));
        assert!(v.is_zero());
    }
}
