//! Ensemble voting: three models per channel, three channels per entry.
//!
//! # Per-channel vote
//!
//! - At least two models agree → that label; confidence is the mean of the
//!   agreeing models' confidences.
//! - Otherwise (all disagree, or only one model produced a prediction) →
//!   the vector-space model's prediction if it produced one, else the most
//!   confident prediction. The channel is flagged `low_confidence`.
//! - No model produced a prediction → the channel abstains.
//!
//! # Cross-channel vote
//!
//! - At least two channels agree → that label; confidence is the mean of the
//!   agreeing channels' confidences.
//! - Otherwise → the tie-break channel (tags by default) if it has a
//!   suggestion, else the most confident channel. When two or more channels
//!   disagreed this way, the result is flagged `low_confidence`.
//! - Every channel abstains → the fallback label with confidence 0.
//!
//! Both steps are pure functions; they never look at the clock or at any
//! state beyond their arguments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{Algorithm, Channel, Prediction};

/// Voting parameters, built from `[ensemble]` in the config.
#[derive(Debug, Clone)]
pub struct EnsemblePolicy {
    pub tie_break_channel: Channel,
    pub min_confidence: f64,
    pub fallback_label: String,
}

impl Default for EnsemblePolicy {
    fn default() -> Self {
        Self {
            tie_break_channel: Channel::Tags,
            min_confidence: 0.0,
            fallback_label: "unclassified".to_string(),
        }
    }
}

/// One model's contribution to a channel vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVote {
    pub algorithm: Algorithm,
    pub prediction: Option<Prediction>,
}

/// How a label was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Majority,
    TieBreak,
    Abstained,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Majority => "majority",
            Decision::TieBreak => "tie_break",
            Decision::Abstained => "abstained",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSuggestion {
    pub channel: Channel,
    pub label: Option<String>,
    pub confidence: f64,
    pub low_confidence: bool,
    pub decision: Decision,
    pub votes: Vec<ModelVote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomySuggestion {
    pub content_id: String,
    pub label: String,
    pub confidence: f64,
    pub low_confidence: bool,
    pub decision: Decision,
    pub channels: Vec<ChannelSuggestion>,
}

impl TaxonomySuggestion {
    /// `true` when no channel produced any prediction.
    pub fn is_fallback(&self) -> bool {
        self.decision == Decision::Abstained
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelSuggestion> {
        self.channels.iter().find(|c| c.channel == channel)
    }
}

/// Combine the three model votes of one channel.
pub fn combine_channel(
    channel: Channel,
    votes: Vec<ModelVote>,
    policy: &EnsemblePolicy,
) -> ChannelSuggestion {
    let predictions: Vec<(Algorithm, &Prediction)> = votes
        .iter()
        .filter_map(|v| v.prediction.as_ref().map(|p| (v.algorithm, p)))
        .collect();

    if predictions.is_empty() {
        return ChannelSuggestion {
            channel,
            label: None,
            confidence: 0.0,
            low_confidence: false,
            decision: Decision::Abstained,
            votes,
        };
    }

    let tally = tally(predictions.iter().map(|(_, p)| (p.label.as_str(), p.confidence)));
    let (label, confidence, decision) = match majority(&tally) {
        Some((label, mean)) => (label.to_string(), mean, Decision::Majority),
        None => {
            let chosen = predictions
                .iter()
                .find(|(a, _)| a.is_vector_space())
                .map(|(_, p)| *p)
                .unwrap_or_else(|| most_confident(&predictions));
            (chosen.label.clone(), chosen.confidence, Decision::TieBreak)
        }
    };

    ChannelSuggestion {
        channel,
        low_confidence: decision == Decision::TieBreak || confidence < policy.min_confidence,
        label: Some(label),
        confidence,
        decision,
        votes,
    }
}

/// Combine per-channel suggestions into the final taxonomy suggestion.
pub fn combine_channels(
    content_id: &str,
    channels: Vec<ChannelSuggestion>,
    policy: &EnsemblePolicy,
) -> TaxonomySuggestion {
    let active: Vec<&ChannelSuggestion> = channels.iter().filter(|c| c.label.is_some()).collect();

    if active.is_empty() {
        return TaxonomySuggestion {
            content_id: content_id.to_string(),
            label: policy.fallback_label.clone(),
            confidence: 0.0,
            low_confidence: true,
            decision: Decision::Abstained,
            channels,
        };
    }

    let tally = tally(
        active
            .iter()
            .filter_map(|c| c.label.as_deref().map(|l| (l, c.confidence))),
    );

    let (label, confidence, decision) = match majority(&tally) {
        Some((label, mean)) => (label.to_string(), mean, Decision::Majority),
        None => {
            let chosen = active
                .iter()
                .find(|c| c.channel == policy.tie_break_channel)
                .copied()
                .unwrap_or_else(|| {
                    let mut best = active[0];
                    for c in &active[1..] {
                        if c.confidence > best.confidence {
                            best = *c;
                        }
                    }
                    best
                });
            (
                chosen.label.clone().unwrap_or_default(),
                chosen.confidence,
                Decision::TieBreak,
            )
        }
    };

    let supporters_uncertain = active
        .iter()
        .filter(|c| c.label.as_deref() == Some(label.as_str()))
        .any(|c| c.low_confidence);
    let contested = decision == Decision::TieBreak && active.len() > 1;

    TaxonomySuggestion {
        content_id: content_id.to_string(),
        low_confidence: contested || supporters_uncertain || confidence < policy.min_confidence,
        label,
        confidence,
        decision,
        channels,
    }
}

/// Label → (votes, confidence sum).
fn tally<'a, I>(items: I) -> BTreeMap<&'a str, (usize, f64)>
where
    I: Iterator<Item = (&'a str, f64)>,
{
    let mut out: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for (label, confidence) in items {
        let entry = out.entry(label).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += confidence;
    }
    out
}

/// Label with at least two votes, and its mean confidence.
fn majority<'a>(tally: &BTreeMap<&'a str, (usize, f64)>) -> Option<(&'a str, f64)> {
    let mut best: Option<(&'a str, usize, f64)> = None;
    for (label, (count, sum)) in tally {
        if *count < 2 {
            continue;
        }
        match best {
            Some((_, c, _)) if *count <= c => {}
            _ => best = Some((*label, *count, *sum)),
        }
    }
    best.map(|(label, count, sum)| (label, sum / count as f64))
}

/// Callers guarantee `predictions` is non-empty.
fn most_confident<'a>(predictions: &[(Algorithm, &'a Prediction)]) -> &'a Prediction {
    let mut best = predictions[0].1;
    for (_, p) in &predictions[1..] {
        if p.confidence > best.confidence
            || (p.confidence == best.confidence && p.label < best.label)
        {
            best = *p;
        }
    }
    best
}
