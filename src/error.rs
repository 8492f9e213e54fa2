//! Typed errors for the outcomes callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error`. [`exit_code`] maps an error
//! chain to the process status used by the `taxo` binary.

use thiserror::Error;

use taxosync_core::ModelKey;

use crate::remote::RemoteError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The enumerated snapshot does not match the remote's declared count.
    /// The store was not touched.
    #[error("integrity check failed: remote declared {declared} entries but {fetched} were fetched")]
    Integrity { declared: usize, fetched: usize },

    #[error("remote source failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("sync cancelled before commit")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Replacing a registry artifact failed. The previous artifact for `key`
/// remains active.
#[derive(Error, Debug)]
#[error("failed to write model artifact {key}: {source}")]
pub struct RegistryWriteError {
    pub key: ModelKey,
    #[source]
    pub source: std::io::Error,
}

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_INTEGRITY: i32 = 3;
pub const EXIT_REGISTRY_WRITE: i32 = 4;

/// Process exit status for an error returned by a command.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(SyncError::Integrity { .. }) = err.downcast_ref::<SyncError>() {
        return EXIT_INTEGRITY;
    }
    if err.downcast_ref::<RegistryWriteError>().is_some() {
        return EXIT_REGISTRY_WRITE;
    }
    EXIT_FAILURE
}
