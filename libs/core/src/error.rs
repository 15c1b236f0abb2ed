use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub const BAD_REQUEST: u16 = 400;
pub const NOT_FOUND: u16 = 404;
pub const REQUEST_TIMEOUT: u16 = 408;
pub const INTERNAL_SERVER_ERROR: u16 = 500;
pub const BAD_GATEWAY: u16 = 502;
pub const SERVICE_UNAVAILABLE: u16 = 503;
pub const GATEWAY_TIMEOUT: u16 = 504;

/// Failures raised by the correlation layer itself.
#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
    #[error("invalid correlated message structure: {0}")]
    InvalidStructure(String),
    #[error("adapter not registered for transport: {0:?}")]
    UnknownTransport(String),
    #[error("action '{0}' is not allowed to broadcast")]
    ActionNotBroadcastable(String),
    #[error("no handler registered for action '{0}'")]
    HandlerNotFound(String),
    #[error("transport {transport} does not support \"{operation}\"")]
    Unsupported {
        transport: String,
        operation: &'static str,
    },
    #[error("{message}")]
    Remote { code: u16, message: String },
    #[error("transport call failed")]
    Transport(#[source] anyhow::Error),
}

impl CorrelationError {
    pub fn status(&self) -> u16 {
        match self {
            CorrelationError::InvalidFormat(_)
            | CorrelationError::InvalidStructure(_)
            | CorrelationError::ActionNotBroadcastable(_) => BAD_REQUEST,
            CorrelationError::HandlerNotFound(_) => NOT_FOUND,
            CorrelationError::UnknownTransport(_) | CorrelationError::Unsupported { .. } => {
                INTERNAL_SERVER_ERROR
            }
            CorrelationError::Remote { code, .. } => *code,
            CorrelationError::Transport(_) => BAD_GATEWAY,
        }
    }

    /// Client-caused rejections that are never worth retrying.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CorrelationError::InvalidFormat(_)
                | CorrelationError::InvalidStructure(_)
                | CorrelationError::ActionNotBroadcastable(_)
        )
    }
}

/// Raised when the breaker rejects a call without running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpen;

/// Raised when a gated call outlives the breaker's timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("call timed out after {0:?}")]
pub struct CallTimeout(pub Duration);

/// Outcome of a call gated by a [`crate::CircuitBreaker`].
///
/// Every variant exposes its cause through `source()`, so a status-bearing
/// error keeps its code whatever `E` is.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    #[error("{0}")]
    Open(#[source] CircuitOpen),
    #[error("{0}")]
    Timeout(#[source] CallTimeout),
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> CircuitError<E> {
    pub fn status(&self) -> Option<u16> {
        match self {
            CircuitError::Open(_) => Some(SERVICE_UNAVAILABLE),
            CircuitError::Timeout(_) => Some(GATEWAY_TIMEOUT),
            CircuitError::Inner(_) => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(err) => Some(err),
            _ => None,
        }
    }
}

/// Domain error that carries its own status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StatusError {
    pub code: u16,
    pub message: String,
}

impl StatusError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(BAD_REQUEST, message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Field-level validation failures, reported together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// `Ok(())` when nothing was recorded, the collected errors otherwise.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl FromIterator<FieldError> for ValidationErrors {
    fn from_iter<I: IntoIterator<Item = FieldError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        f.write_str(&messages.join(", "))
    }
}

impl std::error::Error for ValidationErrors {}
