//! Error types for erpsync

use thiserror::Error;

/// Result type alias for erpsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for erpsync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl SyncError {
    /// Short category label used in log fields and metric rows.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Io(_) => "io",
            SyncError::Serialization(_) => "serialization",
            SyncError::Config(_) => "config",
            SyncError::Network(_) => "network",
            SyncError::Database(_) => "database",
            SyncError::Parse(_) => "parse",
            SyncError::Unknown(_) => "unknown",
        }
    }
}
