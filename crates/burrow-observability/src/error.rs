//! Observability error types

use thiserror::Error;

/// Errors raised while setting up logging
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// The `EnvFilter` directives could not be parsed
    #[error("invalid log filter '{directives}': {reason}")]
    InvalidFilter {
        /// Directives as given
        directives: String,
        /// Parser message
        reason: String,
    },

    /// The log directory could not be prepared
    #[error("log directory error: {0}")]
    Io(#[from] std::io::Error),

    /// A global subscriber is already installed
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Result type alias for observability setup
pub type Result<T> = std::result::Result<T, ObservabilityError>;
