//! Domain error model.

use thiserror::Error;

/// Result type used across the engine.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Only fatal conditions are represented here. Degraded input (an unparsable
/// `virt_limit`, for instance) is logged and treated as an absent attribute,
/// never surfaced as an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The engine was handed an input state it cannot act on.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An attribute that must be well-formed could not be parsed.
    #[error("malformed attribute {key}: {value:?}")]
    MalformedAttribute { key: String, value: String },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. a pool saved that storage no longer knows).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn malformed(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::MalformedAttribute {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Fatal errors abort the synchronization pass; callers surface them as
    /// operation failures and never retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidState(_) | Self::MalformedAttribute { .. } | Self::InvariantViolation(_)
        )
    }
}
