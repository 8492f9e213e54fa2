//! Per-entry classification lifecycle.
//!
//! ```text
//! Unclassified ──suggest──▶ AutoSuggested ──confirm──▶ UserConfirmed ─┐
//!                               │  ▲                                  ├─consume─▶ Retrainable
//!                               │  └────────────suggest───────────────┼──────────────┘
//!                               └──────correct──▶ UserCorrected ──────┘
//! ```
//!
//! `correct` is accepted from every state: a human label always wins.
//! Machine suggestions never demote a human-labeled entry; `suggest` on
//! `UserConfirmed`/`UserCorrected` leaves the state unchanged until a
//! training run has consumed the label.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    #[default]
    Unclassified,
    AutoSuggested,
    UserConfirmed,
    UserCorrected,
    Retrainable,
}

/// Something that happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The ensemble produced a suggestion for the entry.
    Suggested,
    /// A human accepted the latest suggestion.
    Confirmed,
    /// A human supplied a label.
    Corrected,
    /// A production training run used the entry's labels.
    Consumed,
}

impl EntryState {
    pub const ALL: [EntryState; 5] = [
        EntryState::Unclassified,
        EntryState::AutoSuggested,
        EntryState::UserConfirmed,
        EntryState::UserCorrected,
        EntryState::Retrainable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Unclassified => "unclassified",
            EntryState::AutoSuggested => "auto_suggested",
            EntryState::UserConfirmed => "user_confirmed",
            EntryState::UserCorrected => "user_corrected",
            EntryState::Retrainable => "retrainable",
        }
    }

    /// Labels not yet consumed by a production run.
    pub fn is_pending_training(self) -> bool {
        matches!(self, EntryState::UserConfirmed | EntryState::UserCorrected)
    }

    pub fn apply(self, event: LifecycleEvent) -> Result<EntryState, CoreError> {
        use EntryState::*;
        use LifecycleEvent::*;

        let next = match (self, event) {
            (Unclassified | AutoSuggested | Retrainable, Suggested) => AutoSuggested,
            (UserConfirmed | UserCorrected, Suggested) => self,
            (AutoSuggested | UserConfirmed, Confirmed) => UserConfirmed,
            (_, Corrected) => UserCorrected,
            (UserConfirmed | UserCorrected, Consumed) => Retrainable,
            _ => {
                return Err(CoreError::InvalidTransition {
                    from: self.to_string(),
                    event: event.as_str().to_string(),
                })
            }
        };
        Ok(next)
    }
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Suggested => "suggest",
            LifecycleEvent::Confirmed => "confirm",
            LifecycleEvent::Corrected => "correct",
            LifecycleEvent::Consumed => "consume",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        EntryState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown entry state: '{}'", s))
    }
}
