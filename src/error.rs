//! Error types for the event source.

use thiserror::Error;

/// Error for invalid HTTP header configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidHeaderError {
    #[error("invalid header name: {0}")]
    InvalidName(String),
    #[error("invalid header value: {0}")]
    InvalidValue(String),
}

/// Main error type, delivered to `on_error` handlers and returned by the builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventSourceError {
    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("timeout")]
    Timeout,

    #[error("stream ended by server")]
    StreamEnded,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    InvalidHeader(#[from] InvalidHeaderError),

    #[error("no tokio runtime available")]
    NoRuntime,
}

impl EventSourceError {
    /// Create error from a terminal HTTP status code.
    pub fn from_status(status: u16) -> Self {
        EventSourceError::Http { status }
    }

    /// Whether the lifecycle may reconnect after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            EventSourceError::Http { status } => *status >= 500,
            EventSourceError::Network { .. } => true,
            EventSourceError::Timeout => true,
            EventSourceError::StreamEnded => true,
            _ => false,
        }
    }

    /// HTTP status code if applicable
    pub fn status_code(&self) -> Option<u16> {
        match self {
            EventSourceError::Http { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<TransportError> for EventSourceError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => EventSourceError::Timeout,
            TransportError::Network(message) => EventSourceError::Network { message },
            TransportError::Cancelled => EventSourceError::Network {
                message: "cancelled".to_string(),
            },
        }
    }
}

/// Failure reported by a [`Transport`](crate::Transport) when a stream completes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request was cancelled on behalf of the caller.
    #[error("cancelled")]
    Cancelled,

    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Network(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_errors() {
        let err = EventSourceError::from_status(500);
        assert_eq!(err.to_string(), "HTTP status 500");
        assert_eq!(err.status_code(), Some(500));
        assert!(err.is_retryable());

        let err = EventSourceError::from_status(404);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: EventSourceError = TransportError::Network("reset by peer".into()).into();
        assert_eq!(
            err,
            EventSourceError::Network {
                message: "reset by peer".into()
            }
        );
        assert!(err.is_retryable());
        assert_eq!(
            EventSourceError::from(TransportError::Timeout),
            EventSourceError::Timeout
        );
    }
}
