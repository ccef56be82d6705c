use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another instance of feedkeeper appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// The row changed (or vanished) between read and write
    #[error("{entity} {id} was modified concurrently")]
    ConcurrencyConflict { entity: &'static str, id: i64 },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// A configured feed subscription.
///
/// `version` is bumped on every user-visible edit and checked by
/// [`Database::update_source`](super::Database::update_source).
/// Sync bookkeeping (`last_synced`, `last_error`) does not bump it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub category: Option<String>,
    /// Unix seconds of the last completed sync pass, successful or not
    pub last_synced: Option<i64>,
    /// Error from the most recent fetch, cleared on success
    pub last_error: Option<String>,
    pub version: i64,
}

/// Fields needed to create a [`Source`]; the store assigns id and version.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub name: String,
    pub url: String,
    pub category: Option<String>,
}

/// One ingested feed item bound to a source.
///
/// `(source_id, link)` is unique across the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub link: String,
    /// Unix seconds; ingestion time when the feed gave none
    pub published: i64,
    pub read: bool,
    pub favorite: bool,
    pub fetched_at: i64,
}

/// A parsed-but-not-yet-persisted feed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    pub title: String,
    /// First item URI, or empty when the entry had none
    pub link: String,
    pub published: i64,
    pub content: Option<String>,
    pub summary: Option<String>,
}

/// Singleton configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Settings {
    pub refresh_interval_minutes: i64,
    pub max_articles_per_source: i64,
    pub version: i64,
}

impl Settings {
    pub const DEFAULT_REFRESH_INTERVAL_MINUTES: i64 = 60;
    pub const DEFAULT_MAX_ARTICLES_PER_SOURCE: i64 = 100;
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_interval_minutes: Self::DEFAULT_REFRESH_INTERVAL_MINUTES,
            max_articles_per_source: Self::DEFAULT_MAX_ARTICLES_PER_SOURCE,
            version: 0,
        }
    }
}
