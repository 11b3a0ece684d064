//! The canonical error-kind taxonomy and the diagnostics bundle returned to
//! callers. Component-specific `thiserror` enums map onto [`ErrorKind`] at
//! their boundary rather than each inventing their own vocabulary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    Capacity,
    Timeout,
    Quality,
    Transient,
    Permanent,
    Cancelled,
    RateLimitFastFail,
    CircuitOpen,
    QueueFull,
    CapacityReservationExpired,
    InvalidInput,
    CorruptState,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Quality => "quality",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::RateLimitFastFail => "rate_limit_fast_fail",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::CapacityReservationExpired => "capacity_reservation_expired",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::CorruptState => "corrupt_state",
        };
        write!(f, "{s}")
    }
}

/// Diagnostics attached to a structured, user-visible scheduling failure.
/// Deliberately free of secrets: provider/model names and counters only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub retries: u32,
    pub last_status_code: Option<u16>,
    pub last_retry_message: Option<String>,
    pub rate_limit_wait_ms: Option<u64>,
    pub gate_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub diagnostics: Diagnostics,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RateLimit | ErrorKind::Capacity | ErrorKind::Timeout | ErrorKind::Quality | ErrorKind::Transient
        )
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_snake_case_kind_names() {
        assert_eq!(ErrorKind::RateLimitFastFail.to_string(), "rate_limit_fast_fail");
    }

    #[test]
    fn permanent_and_cancelled_are_not_retryable() {
        assert!(!RuntimeError::new(ErrorKind::Permanent, "no").is_retryable());
        assert!(!RuntimeError::new(ErrorKind::Cancelled, "no").is_retryable());
        assert!(RuntimeError::new(ErrorKind::RateLimit, "wait").is_retryable());
    }
}
