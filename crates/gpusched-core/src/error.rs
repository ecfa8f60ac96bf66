//! Error types for gpusched

use thiserror::Error;

/// Main error type for gpusched
#[derive(Error, Debug)]
pub enum GpuschedError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed admission request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// State file content is inconsistent
    #[error("Storage error: {0}")]
    Storage(String),

    /// Lock failure other than contention
    #[error("Lock error: {0}")]
    Lock(String),

    /// Task spawn or signal delivery failure
    #[error("Launch error: {0}")]
    Launch(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for gpusched operations
pub type GpuschedResult<T> = Result<T, GpuschedError>;

impl From<serde_json::Error> for GpuschedError {
    fn from(err: serde_json::Error) -> Self {
        GpuschedError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpuschedError {
    fn from(err: toml::de::Error) -> Self {
        GpuschedError::Config(err.to_string())
    }
}
