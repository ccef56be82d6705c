use super::schema::Database;
use super::types::{DatabaseError, Settings};

impl Database {
    // ========================================================================
    // Settings Operations
    // ========================================================================

    /// Read the settings singleton, creating it with defaults on first access.
    pub async fn get_settings(&self) -> Result<Settings, DatabaseError> {
        sqlx::query(
            "INSERT OR IGNORE INTO settings (id, refresh_interval_minutes, max_articles_per_source) \
             VALUES (1, ?, ?)",
        )
        .bind(Settings::DEFAULT_REFRESH_INTERVAL_MINUTES)
        .bind(Settings::DEFAULT_MAX_ARTICLES_PER_SOURCE)
        .execute(&self.pool)
        .await?;

        let settings = sqlx::query_as::<_, Settings>(
            "SELECT refresh_interval_minutes, max_articles_per_source, version \
             FROM settings WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(settings)
    }

    /// Persist `settings` if nobody changed them since they were read.
    ///
    /// Range checks belong to the caller; the table's CHECK constraints
    /// reject non-positive values as a last line.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::ConcurrencyConflict`] when the stored version
    /// no longer matches `settings.version`.
    pub async fn update_settings(&self, settings: &Settings) -> Result<Settings, DatabaseError> {
        // Make sure the row exists so a first-ever update is not a conflict.
        self.get_settings().await?;

        let updated = sqlx::query_as::<_, Settings>(
            "UPDATE settings SET refresh_interval_minutes = ?, max_articles_per_source = ?, \
             version = version + 1 WHERE id = 1 AND version = ? \
             RETURNING refresh_interval_minutes, max_articles_per_source, version",
        )
        .bind(settings.refresh_interval_minutes)
        .bind(settings.max_articles_per_source)
        .bind(settings.version)
        .fetch_optional(&self.pool)
        .await?;

        let updated = updated.ok_or(DatabaseError::ConcurrencyConflict {
            entity: "settings",
            id: 1,
        })?;

        tracing::info!(
            refresh_interval_minutes = updated.refresh_interval_minutes,
            max_articles_per_source = updated.max_articles_per_source,
            "Settings updated"
        );
        Ok(updated)
    }
}
