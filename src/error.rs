//! Daemon error types.
//!
//! Everything here is fatal: the transient cases (no reader attached,
//! reader detached mid-write, pre-existing output directory) are absorbed
//! by the workers and scanner and never surface as a `BroadcastError`.

use std::io;
use std::path::PathBuf;

use crate::registry::RegistryError;

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, BroadcastError>;

/// Errors that terminate the broadcast daemon.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Failed to list {}: {source}", path.display())]
    List { path: PathBuf, source: io::Error },

    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Failed to open producer pipe {}: {source}", path.display())]
    OpenProducer { path: PathBuf, source: io::Error },

    #[error("Failed to read producer pipe {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to open consumer pipe {}: {source}", path.display())]
    OpenConsumer { path: PathBuf, source: io::Error },

    #[error("Failed to write consumer pipe {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
