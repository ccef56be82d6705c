use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, DatabaseError};

// ============================================================================
// Database
// ============================================================================

/// Handle to the SQLite store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// In-memory databases live inside a single connection.
    const MEMORY_PATH: &'static str = ":memory:";

    /// Open a database connection and run migrations
    ///
    /// Pass `":memory:"` for a throwaway database (tests, dry runs).
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema cannot be created.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == Self::MEMORY_PATH;
        let url = format!("sqlite:{}?mode=rwc", path);

        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                if let Some(parent) = db_path.parent().filter(|p| p.exists()) {
                    tracing::debug!(dir = %parent.display(), "Creating database file");
                    // Created 0600 up front; SQLite reports any failure at connect.
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok();
                }
            }
        }

        // busy_timeout: SQLite waits up to 5 seconds for competing writers
        // (timer-driven pass vs. manual refresh) before returning SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// Every statement is `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                category TEXT,
                last_synced INTEGER,
                last_error TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // No ON DELETE CASCADE: source removal deletes children explicitly.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                source_id INTEGER NOT NULL REFERENCES sources(id),
                title TEXT NOT NULL,
                summary TEXT,
                content TEXT,
                link TEXT NOT NULL,
                published INTEGER NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                favorite INTEGER NOT NULL DEFAULT 0,
                fetched_at INTEGER NOT NULL,
                UNIQUE(source_id, link)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                refresh_interval_minutes INTEGER NOT NULL CHECK (refresh_interval_minutes > 0),
                max_articles_per_source INTEGER NOT NULL CHECK (max_articles_per_source > 0),
                version INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Per-source listing and retention both order by (published DESC, id DESC)
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_source_published ON articles(source_id, published DESC, id DESC)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_unread ON articles(published DESC) WHERE read = 0",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_favorite ON articles(published DESC) WHERE favorite = 1",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
