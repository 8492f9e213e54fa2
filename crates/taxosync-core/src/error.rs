//! Recoverable errors raised by the core training logic.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Not enough labeled examples, or too few distinct classes, to train.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// The model parameters do not match the algorithm they were loaded for.
    #[error("model mismatch: expected {expected}, found {found}")]
    ModelMismatch { expected: String, found: String },

    /// A lifecycle event that is not allowed from the entry's current state.
    #[error("invalid transition: cannot apply '{event}' to an entry in state '{from}'")]
    InvalidTransition { from: String, event: String },
}
