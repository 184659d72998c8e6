use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// The durable checkpoint exists but cannot be read back. Fatal at
    /// startup: starting empty would silently drop dedup history.
    #[error("Checkpoint {} is corrupt: {reason}", .path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error("Failed to write checkpoint {}: {reason}", .path.display())]
    CheckpointWrite { path: PathBuf, reason: String },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl RegistryError {
    #[must_use]
    pub const fn is_corrupt_checkpoint(&self) -> bool {
        matches!(self, Self::CheckpointCorrupt { .. })
    }
}
