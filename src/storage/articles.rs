use super::schema::Database;
use super::types::{Article, CandidateItem, DatabaseError};

const ARTICLE_COLUMNS: &str =
    "id, source_id, title, summary, content, link, published, read, favorite, fetched_at";

impl Database {
    // ========================================================================
    // Article Queries
    // ========================================================================

    /// All articles of one source, newest publish time first.
    ///
    /// Equal publish times are ordered by id, newest insert first; retention
    /// pruning uses the same order so the kept set matches this listing.
    pub async fn list_articles_for_source(
        &self,
        source_id: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        let articles = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE source_id = ? \
             ORDER BY published DESC, id DESC"
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    /// Links already stored for a source; the dedup key set for a sync pass.
    pub async fn list_links_for_source(&self, source_id: i64) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT link FROM articles WHERE source_id = ?")
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(link,)| link).collect())
    }

    /// Unread articles across all sources, newest first.
    pub async fn list_unread_articles(&self) -> Result<Vec<Article>, DatabaseError> {
        let articles = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE read = 0 \
             ORDER BY published DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    /// Favorite articles across all sources, newest first.
    pub async fn list_favorite_articles(&self) -> Result<Vec<Article>, DatabaseError> {
        let articles = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE favorite = 1 \
             ORDER BY published DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn get_article(&self, article_id: i64) -> Result<Option<Article>, DatabaseError> {
        let article = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"
        ))
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    pub async fn count_articles_for_source(&self, source_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Persist a candidate as a new article of `source_id`.
    ///
    /// Returns `None` without writing when the source already has an article
    /// with the same link. A concurrent pass that raced us to the same link
    /// therefore never produces a duplicate.
    pub async fn insert_article(
        &self,
        source_id: i64,
        item: &CandidateItem,
    ) -> Result<Option<Article>, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let inserted = sqlx::query_as::<_, Article>(&format!(
            "INSERT INTO articles (source_id, title, summary, content, link, published, fetched_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(source_id, link) DO NOTHING \
             RETURNING {ARTICLE_COLUMNS}"
        ))
        .bind(source_id)
        .bind(&item.title)
        .bind(&item.summary)
        .bind(&item.content)
        .bind(&item.link)
        .bind(item.published)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted)
    }

    /// Mark an article as read. Returns false if the id is unknown.
    ///
    /// Marking an already-read article succeeds.
    pub async fn mark_article_read(&self, article_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE articles SET read = 1 WHERE id = ?")
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically flip the favorite flag, returning the new value, or `None`
    /// if the id is unknown.
    pub async fn toggle_article_favorite(
        &self,
        article_id: i64,
    ) -> Result<Option<bool>, DatabaseError> {
        let row: Option<(bool,)> = sqlx::query_as(
            "UPDATE articles SET favorite = NOT favorite WHERE id = ? RETURNING favorite",
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(favorite,)| favorite))
    }

    /// Mark every unread article as read, returning how many changed.
    pub async fn mark_all_read(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("UPDATE articles SET read = 1 WHERE read = 0")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Keep only the `cap` most recent articles of every source.
    ///
    /// "Most recent" is by publish time, ties broken by id (newer insert
    /// wins), so repeated runs without new data keep the same set. Runs as
    /// one statement, so it either prunes every source or none.
    /// Returns the number of articles deleted.
    pub async fn prune_to_retention_cap(&self, cap: i64) -> Result<u64, DatabaseError> {
        let cap = cap.max(0);
        let result = sqlx::query(
            r#"
            DELETE FROM articles WHERE id IN (
                SELECT id FROM (
                    SELECT id, ROW_NUMBER() OVER (
                        PARTITION BY source_id
                        ORDER BY published DESC, id DESC
                    ) AS rn
                    FROM articles
                ) WHERE rn > ?
            )
        "#,
        )
        .bind(cap)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
