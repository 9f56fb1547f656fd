//! Error types for galleria-core

use thiserror::Error;

/// Result type alias using galleria-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in galleria-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote source failure (transport, timeout, or non-success status)
    #[error("Remote error{}: {message}", status_suffix(.status))]
    Remote {
        /// HTTP status when the remote answered, `None` for transport failures.
        status: Option<u16>,
        message: String,
    },

    /// Remote resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Media/object storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Payload or cached entry failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Transport failures, timeouts, rate limiting, and 5xx answers are
    /// transient. Everything else is definitive.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote { status: None, .. } => true,
            Self::Remote {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (HTTP {code})")).unwrap_or_default()
}
