//! Error types for streaming operations.

use thiserror::Error;

/// Errors that can occur while maintaining a log subscription.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("failed to parse message: {0}")]
    ParseError(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("monitor destroyed")]
    Destroyed,
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        StreamError::ConnectionFailed(err.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::ParseError(err.to_string())
    }
}

impl From<url::ParseError> for StreamError {
    fn from(err: url::ParseError) -> Self {
        StreamError::ConnectionFailed(err.to_string())
    }
}

impl StreamError {
    /// True for errors the monitor recovers from via backoff reconnection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectionFailed(_)
                | StreamError::Disconnected(_)
                | StreamError::HandshakeFailed(_)
                | StreamError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StreamError::ConnectionFailed("x".into()).is_transient());
        assert!(StreamError::Disconnected("x".into()).is_transient());
        assert!(StreamError::Timeout("x".into()).is_transient());
        assert!(!StreamError::Destroyed.is_transient());
        assert!(!StreamError::ParseError("x".into()).is_transient());
    }
}
