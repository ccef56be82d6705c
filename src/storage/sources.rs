use super::schema::Database;
use super::types::{DatabaseError, NewSource, Source};

const SOURCE_COLUMNS: &str = "id, name, url, category, last_synced, last_error, version";

impl Database {
    // ========================================================================
    // Source Queries
    // ========================================================================

    /// All configured sources in creation (id) order.
    ///
    /// The order is stable for the lifetime of the database, which keeps
    /// all-source sync passes deterministic.
    pub async fn list_sources(&self) -> Result<Vec<Source>, DatabaseError> {
        let sources = sqlx::query_as::<_, Source>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    pub async fn get_source(&self, source_id: i64) -> Result<Option<Source>, DatabaseError> {
        let source = sqlx::query_as::<_, Source>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?"
        ))
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(source)
    }

    // ========================================================================
    // Source Mutations
    // ========================================================================

    /// Insert a new source, returning it with its assigned id.
    ///
    /// URL validation is the caller's job; the store accepts any string.
    pub async fn insert_source(&self, source: &NewSource) -> Result<Source, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let inserted = sqlx::query_as::<_, Source>(&format!(
            "INSERT INTO sources (name, url, category, created_at) VALUES (?, ?, ?, ?) \
             RETURNING {SOURCE_COLUMNS}"
        ))
        .bind(&source.name)
        .bind(&source.url)
        .bind(&source.category)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(source_id = inserted.id, url = %inserted.url, "Inserted source");
        Ok(inserted)
    }

    /// Write back the editable fields of `source` (name, url, category).
    ///
    /// The write only lands if the stored `version` still equals
    /// `source.version`; the returned source carries the bumped version.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::ConcurrencyConflict`] when the row was edited
    /// or deleted since `source` was read.
    pub async fn update_source(&self, source: &Source) -> Result<Source, DatabaseError> {
        let updated = sqlx::query_as::<_, Source>(&format!(
            "UPDATE sources SET name = ?, url = ?, category = ?, version = version + 1 \
             WHERE id = ? AND version = ? RETURNING {SOURCE_COLUMNS}"
        ))
        .bind(&source.name)
        .bind(&source.url)
        .bind(&source.category)
        .bind(source.id)
        .bind(source.version)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or(DatabaseError::ConcurrencyConflict {
            entity: "source",
            id: source.id,
        })
    }

    /// Stamp a completed sync pass: set `last_synced` to now and replace
    /// `last_error` (`None` clears it). Returns false if the source is gone.
    pub async fn record_source_sync(
        &self,
        source_id: i64,
        error: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("UPDATE sources SET last_synced = ?, last_error = ? WHERE id = ?")
            .bind(now)
            .bind(error)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a source and every article it owns.
    ///
    /// Children are removed first, then the source row, inside one
    /// transaction. Returns false (and changes nothing) if the id is unknown.
    pub async fn delete_source(&self, source_id: i64) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let articles = sqlx::query("DELETE FROM articles WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        let sources = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        if sources.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        tracing::info!(
            source_id = source_id,
            articles = articles.rows_affected(),
            "Deleted source"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{CandidateItem, Database, NewSource};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_source(n: i64) -> NewSource {
        NewSource {
            name: format!("Test Source {}", n),
            url: format!("https://feed{}.example.com/rss", n),
            category: None,
        }
    }

    fn test_candidate(link: &str) -> CandidateItem {
        CandidateItem {
            title: format!("Title {}", link),
            link: link.to_string(),
            published: 1_704_067_200,
            content: None,
            summary: None,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_version() {
        let db = test_db().await;
        let source = db.insert_source(&test_source(1)).await.unwrap();

        assert!(source.id > 0);
        assert_eq!(source.version, 0);
        assert_eq!(source.name, "Test Source 1");
        assert_eq!(source.last_synced, None);
        assert_eq!(source.last_error, None);
    }

    #[tokio::test]
    async fn test_list_sources_in_id_order() {
        let db = test_db().await;
        for n in [3, 1, 2] {
            db.insert_source(&test_source(n)).await.unwrap();
        }

        let names: Vec<String> = db
            .list_sources()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            vec!["Test Source 3", "Test Source 1", "Test Source 2"]
        );
    }

    #[tokio::test]
    async fn test_get_missing_source() {
        let db = test_db().await;
        assert!(db.get_source(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let db = test_db().await;
        let mut source = db.insert_source(&test_source(1)).await.unwrap();

        source.name = "Renamed".to_string();
        source.category = Some("Tech".to_string());
        let updated = db.update_source(&source).await.unwrap();

        assert_eq!(updated.version, 1);
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.category.as_deref(), Some("Tech"));
    }

    #[tokio::test]
    async fn test_update_stale_version_conflicts() {
        let db = test_db().await;
        let original = db.insert_source(&test_source(1)).await.unwrap();

        let mut first = original.clone();
        first.name = "First writer".to_string();
        db.update_source(&first).await.unwrap();

        let mut second = original;
        second.name = "Second writer".to_string();
        let err = db.update_source(&second).await.unwrap_err();
        assert!(matches!(
            err,
            crate::storage::DatabaseError::ConcurrencyConflict { entity: "source", .. }
        ));

        let stored = db.get_source(first.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "First writer");
    }

    #[tokio::test]
    async fn test_update_deleted_source_conflicts() {
        let db = test_db().await;
        let source = db.insert_source(&test_source(1)).await.unwrap();
        db.delete_source(source.id).await.unwrap();

        assert!(db.update_source(&source).await.is_err());
    }

    #[tokio::test]
    async fn test_record_sync_sets_and_clears_error() {
        let db = test_db().await;
        let source = db.insert_source(&test_source(1)).await.unwrap();

        assert!(db
            .record_source_sync(source.id, Some("HTTP error: status 500"))
            .await
            .unwrap());
        let stored = db.get_source(source.id).await.unwrap().unwrap();
        assert!(stored.last_synced.is_some());
        assert_eq!(stored.last_error.as_deref(), Some("HTTP error: status 500"));
        // Bookkeeping does not count as an edit.
        assert_eq!(stored.version, 0);

        db.record_source_sync(source.id, None).await.unwrap();
        let stored = db.get_source(source.id).await.unwrap().unwrap();
        assert_eq!(stored.last_error, None);
    }

    #[tokio::test]
    async fn test_record_sync_missing_source() {
        let db = test_db().await;
        assert!(!db.record_source_sync(99, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_source_removes_its_articles_only() {
        let db = test_db().await;
        let doomed = db.insert_source(&test_source(1)).await.unwrap();
        let kept = db.insert_source(&test_source(2)).await.unwrap();

        for link in ["a", "b", "c"] {
            db.insert_article(doomed.id, &test_candidate(link))
                .await
                .unwrap();
        }
        db.insert_article(kept.id, &test_candidate("a")).await.unwrap();

        assert!(db.delete_source(doomed.id).await.unwrap());

        assert!(db.get_source(doomed.id).await.unwrap().is_none());
        assert_eq!(db.count_articles_for_source(doomed.id).await.unwrap(), 0);
        assert_eq!(db.count_articles_for_source(kept.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_source_returns_false() {
        let db = test_db().await;
        assert!(!db.delete_source(7).await.unwrap());
    }
}
