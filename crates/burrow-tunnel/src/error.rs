//! Error types for tunnel operations

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors that can occur while relaying traffic through a tunnel
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Another tunnel already owns the public endpoint
    #[error("a tunnel is already active")]
    AlreadyActive,

    /// No response arrived before the forwarding deadline
    #[error("Operation timed out")]
    Timeout,

    /// The tunnel connection went away while a request was in flight
    #[error("Connection closed")]
    ConnectionClosed,

    /// Nothing is available to serve the request (no tunnel, no store, no file)
    #[error("Not found: {what}")]
    NotFound {
        /// What was looked up
        what: String,
    },

    /// The agent could not complete its call against the local port
    #[error("Local call failed: {message}")]
    LocalCall {
        /// Description of the failed stage
        message: String,
    },

    /// The server refused the tunnel in its control message
    #[error("server error: {reason}")]
    Rejected {
        /// Reason reported by the server
        reason: String,
    },

    /// Protocol-level error (malformed frame, decode failure)
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message describing the protocol violation
        message: String,
    },

    /// Transport error (connection refused, reset, websocket failure)
    #[error("Connection error: {source}")]
    Connection {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Configuration error (invalid config, missing required field)
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl TunnelError {
    /// Create a new not-found error
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a new local call error
    #[must_use]
    pub fn local_call(message: impl Into<String>) -> Self {
        Self::LocalCall {
            message: message.into(),
        }
    }

    /// Create a new rejection error
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Create a new protocol error
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new connection error from any error type
    #[must_use]
    pub fn connection<E: std::error::Error>(err: E) -> Self {
        Self::Connection {
            source: std::io::Error::other(err.to_string()),
        }
    }

    /// Create a new connection error with a message
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            source: std::io::Error::other(message.into()),
        }
    }
}

/// Result type alias for tunnel operations
pub type Result<T> = std::result::Result<T, TunnelError>;

impl From<tokio_tungstenite::tungstenite::Error> for TunnelError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::connection(err)
    }
}

impl From<axum::Error> for TunnelError {
    fn from(err: axum::Error) -> Self {
        Self::connection(err)
    }
}

impl IntoResponse for TunnelError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Timeout => (StatusCode::GATEWAY_TIMEOUT, "Request timeout".to_string()),
            Self::ConnectionClosed => (StatusCode::BAD_GATEWAY, "Connection closed".to_string()),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            Self::AlreadyActive => (StatusCode::CONFLICT, self.to_string()),
            _ => (
                StatusCode::BAD_GATEWAY,
                "Failed to forward request".to_string(),
            ),
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunnelError::AlreadyActive;
        assert_eq!(err.to_string(), "a tunnel is already active");

        let err = TunnelError::Timeout;
        assert_eq!(err.to_string(), "Operation timed out");

        let err = TunnelError::ConnectionClosed;
        assert_eq!(err.to_string(), "Connection closed");

        let err = TunnelError::not_found("active tunnel");
        assert_eq!(err.to_string(), "Not found: active tunnel");

        let err = TunnelError::rejected("a tunnel is already active");
        assert_eq!(err.to_string(), "server error: a tunnel is already active");

        let err = TunnelError::protocol("missing field `id`");
        assert_eq!(err.to_string(), "Protocol error: missing field `id`");

        let err = TunnelError::config("local_port cannot be 0");
        assert_eq!(
            err.to_string(),
            "Configuration error: local_port cannot be 0"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let tunnel_err: TunnelError = io_err.into();
        assert!(matches!(tunnel_err, TunnelError::Connection { .. }));
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (TunnelError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (TunnelError::ConnectionClosed, StatusCode::BAD_GATEWAY),
            (TunnelError::not_found("store"), StatusCode::NOT_FOUND),
            (TunnelError::AlreadyActive, StatusCode::CONFLICT),
            (TunnelError::protocol("bad frame"), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_websocket_error_conversion() {
        let err: TunnelError = tokio_tungstenite::tungstenite::Error::AlreadyClosed.into();
        assert!(matches!(err, TunnelError::Connection { .. }));

        let err: TunnelError = axum::Error::new(std::io::Error::other("reset")).into();
        assert_eq!(err.to_string(), "Connection error: reset");
    }

    #[test]
    fn test_connection_msg() {
        let err = TunnelError::connection_msg("reset by peer");
        assert_eq!(err.to_string(), "Connection error: reset by peer");
    }
}
