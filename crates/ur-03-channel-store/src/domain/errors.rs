//! # Store Errors
//!
//! Every variant here is a durability failure: the receiver must not keep
//! running on a state file it cannot trust.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the channel store and its key-value backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    /// State file is readable or writable by group/other.
    #[error("state file {} has insecure permissions {mode:o}", path.display())]
    InsecureStateFile { path: PathBuf, mode: u32 },

    /// State file belongs to a different network, contract or receiver.
    #[error("state file {field} mismatch: stored {stored}, configured {configured}")]
    IdentityMismatch {
        field: &'static str,
        stored: String,
        configured: String,
    },

    /// File image failed its checksum or could not be parsed.
    #[error("corrupted state file: {0}")]
    Corrupted(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors from the advisory state-file lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to create lock file: {0}")]
    CreateFailed(io::Error),

    /// Another process holds the lock.
    #[error("state already in use{} ({})", pid.map(|p| format!(" by process {p}")).unwrap_or_default(), path.display())]
    AlreadyLocked { pid: Option<u32>, path: PathBuf },

    #[error("failed to write PID to lock file: {0}")]
    WriteFailed(io::Error),
}
