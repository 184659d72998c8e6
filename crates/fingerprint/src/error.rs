use thiserror::Error;

/// Result type for fingerprinting operations
pub type Result<T> = std::result::Result<T, FingerprintError>;

/// Errors that can occur while fingerprinting source text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    /// Empty, whitespace-only or token-free input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal fingerprinting failure
    #[error("Fingerprint failure: {0}")]
    Failure(String),
}

impl FingerprintError {
    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an internal failure error
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Failure(msg.into())
    }
}
