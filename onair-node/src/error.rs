use thiserror::Error;

/// Errors that can occur while synchronizing status across nodes
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Status name outside the configured set
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Failed to acquire network resources at startup
    #[error("Startup error: {0}")]
    Startup(String),

    /// Outbound push did not complete
    #[error("Push to {peer} failed: {reason}")]
    PushFailure { peer: String, reason: String },

    /// A peer disagrees with our configured status set
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Teardown step failed
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Whether this error must abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::Startup(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::Config(err.to_string())
    }
}
