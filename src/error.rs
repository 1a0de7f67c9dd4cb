//! Error taxonomy for the import and transformation engine.
//!
//! `TableError` separates user-facing failures (bad input, bad expressions,
//! type conflicts) from internal invariant violations. Errors are cloneable
//! because transformations store them (per-row error maps, failed table
//! nodes) and re-raise on every access.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TableError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// Format guessing could not produce a usable format for the input.
    #[error("format guess failed: {0}")]
    Guess(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("table '{0}' already exists")]
    DuplicateTable(String),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("expression error: {0}")]
    Expression(String),

    /// A row-level failure: cell parse errors, per-row evaluation errors.
    #[error("row {row}: {message}")]
    Fetch { row: usize, message: String },

    #[error("column '{column}' has conflicting types: {left} vs {right}")]
    TypeConflict {
        column: String,
        left: String,
        right: String,
    },

    #[error("{0}")]
    User(String),

    /// Invariant violation inside the engine. Report as a bug, not bad input.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TableError {
    pub fn internal(message: impl Into<String>) -> Self {
        TableError::Internal(message.into())
    }

    pub fn fetch(row: usize, message: impl Into<String>) -> Self {
        TableError::Fetch {
            row,
            message: message.into(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, TableError::Internal(_))
    }

    pub fn is_user(&self) -> bool {
        !self.is_internal()
    }
}
