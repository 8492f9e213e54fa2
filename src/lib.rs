//! # taxosync
//!
//! Keeps a local, count-verified copy of a remote content catalog and
//! classifies its entries into a taxonomy with a nine-model ensemble
//! (three text channels × three algorithms), learning from human
//! corrections over time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ RemoteSource │──▶│ SyncManager  │──▶│ ContentStore │
//! │  HTTP/File   │   │ count-verify │   │ catalog.json │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                               │
//!                  ┌────────────────────────────┤
//!                  ▼                            ▼
//!          ┌───────────────┐           ┌──────────────────┐
//!          │ Training      │──────────▶│ ModelRegistry    │
//!          │ Pipeline      │           │ 9 JSON artifacts │
//!          └───────▲───────┘           └────────┬─────────┘
//!                  │                            ▼
//!          ┌───────┴───────┐           ┌──────────────────┐
//!          │ Correction    │◀──────────│ Ensemble         │
//!          │ Feedback      │  confirm  │ Classifier       │
//!          └───────────────┘           └──────────────────┘
//! ```
//!
//! Audit records, human labels, and lifecycle state live in SQLite.
//! Pure logic (features, classifiers, voting, lifecycle) is in the
//! `taxosync-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! taxo init                         # create database and registry dir
//! taxo sync                         # refresh the content store
//! taxo train                        # train all nine models
//! taxo classify --id 1234
//! taxo label 1234 --label Massage   # correct a suggestion
//! taxo train                        # retrain with the correction
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`remote`] | Paged remote sources (HTTP, JSON dump) |
//! | [`sync`] | Count-verified store refresh |
//! | [`content_store`] | The local catalog file |
//! | [`atomic`] | Locked atomic file replacement |
//! | [`registry`] | Active model artifact per key |
//! | [`training`] | Dataset assembly and (re)training |
//! | [`classify`] | Ensemble classification |
//! | [`feedback`] | Human confirmations and corrections |
//! | [`audit`] | Append-only classification records |
//! | [`lifecycle_store`] | Persisted entry lifecycle state |
//! | [`status`] | Store, registry and feedback overview |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod atomic;
pub mod audit;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod content_store;
pub mod db;
pub mod error;
pub mod feedback;
pub mod lifecycle_store;
pub mod migrate;
pub mod progress;
pub mod registry;
pub mod remote;
pub mod status;
pub mod sync;
pub mod training;
