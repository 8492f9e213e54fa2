//! # taxosync core
//!
//! Pure classification logic shared by the `taxosync` CLI and library:
//! content models, deterministic feature extraction, the three classifier
//! variants, ensemble voting, and the per-entry classification lifecycle.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! Everything here is a deterministic function of its inputs, which is what
//! makes retraining reproducible and the ensemble testable in isolation.

pub mod classifier;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod lifecycle;
pub mod models;

pub use classifier::{Classifier, ModelParams};
pub use error::CoreError;
pub use models::{Algorithm, Channel, ContentEntry, ModelKey, Prediction};
