// ⚠️ Error taxonomy for the course ledger
// Parse and roster-match failures are NOT errors here: they are counted as skips
// by the pipeline. Only store, timeout, and loading problems surface to the caller.

use std::time::Duration;
use thiserror::Error;

/// Result type used across the library
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// The store rejected or failed a call (network, constraint violation, I/O)
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The caller-side deadline tripped before the run finished
    #[error("Timed out after {}s waiting for the record store; check the database connection and retry", .0.as_secs())]
    Timeout(Duration),

    /// Roster file could not be loaded or is inconsistent
    #[error("Roster error: {0}")]
    Roster(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A manual edit would break a record invariant (e.g. hours <= 0)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    /// True when the failure came from the deadline guard rather than the store itself
    pub fn is_timeout(&self) -> bool {
        matches!(self, LedgerError::Timeout(_))
    }
}
