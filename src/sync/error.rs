use thiserror::Error;

use crate::feed::OpmlError;
use crate::storage::DatabaseError;

/// Errors surfaced by the sync engine and scheduler.
///
/// Fetch failures are deliberately absent: they are recorded on the source
/// (`last_error`) and never abort an operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The URL is not an absolute http/https URL
    #[error("Invalid feed URL: {0}")]
    InvalidFeedUrl(String),

    #[error("Source {0} not found")]
    SourceNotFound(i64),

    /// The record changed since the caller read it; re-read and retry
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Storage(DatabaseError),

    #[error(transparent)]
    Opml(#[from] OpmlError),
}

impl From<DatabaseError> for SyncError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::ConcurrencyConflict { .. } => {
                SyncError::ConcurrencyConflict(err.to_string())
            }
            other => SyncError::Storage(other),
        }
    }
}
