//! Error types for the coding-room session client.

use thiserror::Error;

/// Errors that can occur when using the session client.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// The channel to the relay could not be established.
    ///
    /// Fatal to the session: the caller returns to the pre-join state.
    #[error("connection failed after {attempts} attempt(s): {reason}")]
    Connection {
        /// Number of connection attempts made before giving up.
        attempts: u32,
        /// Description of the last failure.
        reason: String,
    },

    /// Failed to serialize or deserialize a relay frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires a live session after it ended.
    #[error("not connected to relay")]
    NotConnected,

    /// The join request was rejected locally before anything was sent.
    #[error("invalid join request: {0}")]
    InvalidJoin(&'static str),

    /// A chat message with no visible content was rejected.
    #[error("chat message is empty")]
    EmptyMessage,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Returns `true` for errors that end the session rather than a single
    /// operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TransportReceive(_)
                | Self::TransportClosed
                | Self::Connection { .. }
                | Self::NotConnected
                | Self::Io(_)
        )
    }
}

/// A specialized [`Result`] type for session client operations.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_mentions_attempts() {
        let err = SessionError::Connection {
            attempts: 1,
            reason: "refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "connection failed after 1 attempt(s): refused"
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn local_validation_errors_are_not_fatal() {
        assert!(!SessionError::EmptyMessage.is_fatal());
        assert!(!SessionError::InvalidJoin("room id and username are required").is_fatal());
        assert!(!SessionError::Timeout.is_fatal());
    }

    #[test]
    fn serde_errors_convert() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SessionError = err.into();
        assert!(matches!(err, SessionError::Serialization(_)));
    }
}
