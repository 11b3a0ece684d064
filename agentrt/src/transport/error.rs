//! Errors surfaced by a [`super::Transport`] implementation.

use std::time::Duration;
use thiserror::Error;

/// Failures a transport may report. The retry engine (C6) classifies these
/// into the canonical error-kind taxonomy; this type only carries what the
/// transport itself knows.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("provider error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, TransportError::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::RateLimited { .. } => true,
            TransportError::ApiError { status, .. } => *status >= 500,
            TransportError::Unavailable(_) => true,
            TransportError::Timeout(_) => true,
            TransportError::InvalidResponse(_) => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::ApiError { status, .. } => Some(*status),
            TransportError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retryable_and_rate_limit() {
        let err = TransportError::RateLimited {
            retry_after: Duration::from_secs(1),
        };
        assert!(err.is_rate_limit());
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn server_errors_retryable_client_errors_not() {
        let server = TransportError::ApiError {
            status: 503,
            message: "overloaded".into(),
        };
        assert!(server.is_retryable());

        let client = TransportError::ApiError {
            status: 400,
            message: "bad request".into(),
        };
        assert!(!client.is_retryable());
    }
}
