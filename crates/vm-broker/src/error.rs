//! Error types for vm-broker

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::types::TransactionId;

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the broker
#[derive(Error, Debug)]
pub enum Error {
    /// A blocking call was preempted by the shutdown signal, or the
    /// transaction was cancelled before its outcome was read
    #[error("Operation cancelled")]
    Cancelled,

    /// The identifier is not present in the transaction table
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    /// Error produced by the underlying lifecycle operation, passed through unchanged
    #[error("Operation failed: {0}")]
    Operation(#[from] OperationError),

    /// The transaction produced a value of a different operation family
    #[error("Transaction {id} did not produce a {expected} result")]
    UnexpectedResult {
        /// Transaction that was read
        id: TransactionId,
        /// Result family the accessor expected
        expected: &'static str,
    },

    /// The dispatcher has stopped and no longer accepts actions
    #[error("Dispatcher is not running")]
    DispatcherClosed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Check if this is a cancellation error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Check if this error reports an unknown transaction
    pub fn is_unknown_transaction(&self) -> bool {
        matches!(self, Error::UnknownTransaction(_))
    }

    /// The underlying operation error, if any
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            Error::Operation(err) => Some(err),
            _ => None,
        }
    }
}

/// Broad classification of an operation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationErrorKind {
    /// The named instance does not exist
    NotFound,
    /// An instance with that name already exists
    AlreadyExists,
    /// The operation observed a cancellation request and gave up
    Cancelled,
    /// Any other failure reported by the backend
    Backend,
}

/// Opaque error reported by an instance service
///
/// The broker never interprets this value; it is carried from the
/// operation runner to the caller as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct OperationError {
    /// Error classification
    pub kind: OperationErrorKind,
    /// Human readable description
    pub message: String,
}

impl OperationError {
    /// Create an operation error of the given kind
    pub fn new(kind: OperationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a not-found error for an instance
    pub fn not_found(instance: &str) -> Self {
        Self::new(
            OperationErrorKind::NotFound,
            format!("Instance '{}' not found", instance),
        )
    }

    /// Create an already-exists error for an instance
    pub fn already_exists(instance: &str) -> Self {
        Self::new(
            OperationErrorKind::AlreadyExists,
            format!("Instance '{}' already exists", instance),
        )
    }

    /// Create a cancellation error
    pub fn cancelled() -> Self {
        Self::new(OperationErrorKind::Cancelled, "Operation cancelled")
    }

    /// Create a generic backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(OperationErrorKind::Backend, message)
    }
}
