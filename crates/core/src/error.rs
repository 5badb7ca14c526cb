//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic domain-level failure.
///
/// Covers validation, invariant and conflict failures that are decided purely
/// from domain state. Storage failures are represented separately in the
/// infrastructure layer and never masquerade as domain errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input failed validation before any state was touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant would have been violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The referenced record does not exist.
    #[error("not found")]
    NotFound,

    /// The operation conflicts with the record's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The acting caller is not entitled to the operation.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
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
}
