//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Synchronous, caller-facing failures of a business operation. Drift found by
/// reconciliation is never one of these: it is reported, not returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or illegal input (non-positive quantity, same source and
    /// destination, missing tenant connection, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation is not legal from the record's current status.
    #[error("invalid state transition: cannot {action} from {from}")]
    InvalidStateTransition { from: String, action: String },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Unknown transfer, invoice, transaction or receipt.
    #[error("not found: {0}")]
    NotFound(String),

    /// The source scope does not hold enough stock at completion time.
    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: i64, requested: i64 },

    /// An optimistic write lost against a concurrent writer.
    #[error("concurrent modification: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(from: impl core::fmt::Display, action: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            action: action.into(),
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

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn insufficient_stock(available: i64, requested: i64) -> Self {
        Self::InsufficientStock {
            available,
            requested,
        }
    }

    /// Only optimistic write conflicts are worth retrying automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
