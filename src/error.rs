//! Error taxonomy for the advance ledger.
//!
//! Validation and not-found errors are meant to be handled at the boundary
//! and returned to the caller immediately; storage errors abort the current
//! operation without leaving a partially applied transaction behind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Missing or malformed required input. No state was mutated.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced staff, advance, or payment record does not exist in the
    /// given branch scope.
    #[error("{0} not found")]
    NotFound(String),

    /// Underlying store failure. The original error is attached for
    /// diagnostics; callers should surface a generic failure message.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Filesystem failure while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("database lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        LedgerError::NotFound(what.into())
    }
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, LedgerError>;
