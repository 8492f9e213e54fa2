//! Core data models shared by the sync, training, and classification layers.
//!
//! [`ContentEntry`] is the unit of the local catalog snapshot. [`Channel`] and
//! [`Algorithm`] together form a [`ModelKey`], the identity of one trained
//! model artifact (three channels × three algorithms = nine keys).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One item of the content catalog, as committed to the ContentStore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// SHA-256 of the raw remote payload for this entry.
    pub checksum: String,
    pub last_synced: DateTime<Utc>,
}

impl ContentEntry {
    /// Raw text of one channel. Tags are joined with `", "`.
    pub fn channel_text(&self, channel: Channel) -> String {
        match channel {
            Channel::Title => self.title.clone(),
            Channel::Description => self.description.clone(),
            Channel::Tags => self.tags.join(", "),
        }
    }

    /// Build an ad-hoc entry from free text (used by `taxo classify --title ...`).
    ///
    /// The identifier is derived from the text so repeated calls with the same
    /// input land on the same audit key.
    pub fn from_text(title: &str, description: &str, tags: &[String]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update([0u8]);
        hasher.update(description.as_bytes());
        hasher.update([0u8]);
        hasher.update(tags.join(",").as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self {
            id: format!("text:{}", &digest[..12]),
            title: title.to_string(),
            description: description.to_string(),
            tags: tags.to_vec(),
            category: None,
            checksum: digest,
            last_synced: DateTime::<Utc>::default(),
        }
    }
}

/// Compute the checksum stored in [`ContentEntry::checksum`].
pub fn payload_checksum(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    format!("{:x}", hasher.finalize())
}

/// Independent text source used for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Title,
    Description,
    Tags,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Title, Channel::Description, Channel::Tags];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Title => "title",
            Channel::Description => "description",
            Channel::Tags => "tags",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "title" | "titles" => Ok(Channel::Title),
            "description" | "descriptions" => Ok(Channel::Description),
            "tags" | "tag" => Ok(Channel::Tags),
            other => anyhow::bail!(
                "Unknown channel: '{}'. Must be title, description, or tags.",
                other
            ),
        }
    }
}

/// Learning algorithm variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Naive Bayes over token presence/absence.
    BernoulliNb,
    /// Naive Bayes over token frequencies.
    MultinomialNb,
    /// Nearest class centroid in TF-IDF space (cosine similarity).
    TfidfCentroid,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [
        Algorithm::BernoulliNb,
        Algorithm::MultinomialNb,
        Algorithm::TfidfCentroid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::BernoulliNb => "bernoulli-nb",
            Algorithm::MultinomialNb => "multinomial-nb",
            Algorithm::TfidfCentroid => "tfidf-centroid",
        }
    }

    /// The vector-space model breaks three-way ties inside a channel.
    pub fn is_vector_space(&self) -> bool {
        matches!(self, Algorithm::TfidfCentroid)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "bernoulli-nb" | "bernoulli" => Ok(Algorithm::BernoulliNb),
            "multinomial-nb" | "multinomial" => Ok(Algorithm::MultinomialNb),
            "tfidf-centroid" | "tfidf" => Ok(Algorithm::TfidfCentroid),
            other => anyhow::bail!(
                "Unknown algorithm: '{}'. Must be bernoulli-nb, multinomial-nb, or tfidf-centroid.",
                other
            ),
        }
    }
}

/// Identity of one model artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub channel: Channel,
    pub algorithm: Algorithm,
}

impl ModelKey {
    pub fn new(channel: Channel, algorithm: Algorithm) -> Self {
        Self { channel, algorithm }
    }

    /// All nine keys in a stable order (channel-major).
    pub fn all() -> Vec<ModelKey> {
        Channel::ALL
            .iter()
            .flat_map(|c| Algorithm::ALL.iter().map(move |a| ModelKey::new(*c, *a)))
            .collect()
    }

    /// Deterministic artifact file stem, e.g. `title.bernoulli-nb`.
    pub fn file_stem(&self) -> String {
        format!("{}.{}", self.channel, self.algorithm)
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.algorithm)
    }
}

/// Output of a single model: a label and a confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_key_all_is_nine_and_stable() {
        let keys = ModelKey::all();
        assert_eq!(keys.len(), 9);
        assert_eq!(keys[0], ModelKey::new(Channel::Title, Algorithm::BernoulliNb));
        assert_eq!(keys[8], ModelKey::new(Channel::Tags, Algorithm::TfidfCentroid));
        assert_eq!(keys, ModelKey::all());
    }

    #[test]
    fn test_file_stem() {
        let key = ModelKey::new(Channel::Description, Algorithm::MultinomialNb);
        assert_eq!(key.file_stem(), "description.multinomial-nb");
    }

    #[test]
    fn test_parse_channel_and_algorithm() {
        assert_eq!("tags".parse::<Channel>().unwrap(), Channel::Tags);
        assert_eq!("tfidf".parse::<Algorithm>().unwrap(), Algorithm::TfidfCentroid);
        assert!("body".parse::<Channel>().is_err());
        assert!("svm".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_from_text_is_deterministic() {
        let tags = vec!["massage".to_string()];
        let a = ContentEntry::from_text("hot massage", "relaxing", &tags);
        let b = ContentEntry::from_text("hot massage", "relaxing", &tags);
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("text:"));
        assert_eq!(a.channel_text(Channel::Tags), "massage");
    }
}
