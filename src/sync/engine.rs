use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

use super::error::SyncError;
use super::notify::{NewArticles, Notifier, DEFAULT_NOTIFICATION_CAPACITY};
use crate::feed::{self, FeedFetcher, FetchError, OpmlFeed};
use crate::storage::{Article, Database, NewSource, Settings, Source};
use crate::util::{clean_label, validate_url};

/// Upper bound on one source fetch, including the fetcher's own retries.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of an OPML import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
}

/// Orchestrates sync passes: fetch, dedup, persist, stamp, prune, notify.
///
/// Safe to share behind an `Arc` between the scheduler and manual callers.
/// All-source passes are serialised; per-source passes may overlap and rely
/// on the store's `(source_id, link)` uniqueness for idempotence.
pub struct SyncEngine {
    db: Database,
    fetcher: Arc<dyn FeedFetcher>,
    notifier: Notifier,
    pass_lock: Mutex<()>,
    fetch_timeout: Duration,
}

impl SyncEngine {
    pub fn new(db: Database, fetcher: Arc<dyn FeedFetcher>) -> Self {
        Self {
            db,
            fetcher,
            notifier: Notifier::new(DEFAULT_NOTIFICATION_CAPACITY),
            pass_lock: Mutex::new(()),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Bound every source fetch by `timeout`; a fetch that exceeds it is
    /// recorded as [`FetchError::Timeout`].
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Buffer size for each notification subscriber.
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notifier = Notifier::new(capacity);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Register for [`NewArticles`] events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<NewArticles> {
        self.notifier.subscribe()
    }

    // ========================================================================
    // Sync Passes
    // ========================================================================

    /// Run one sync pass for a single source, returning the articles it
    /// persisted (possibly none).
    ///
    /// A fetch failure does not fail the call: it is logged, stored on the
    /// source as `last_error`, and the pass returns no articles.
    pub async fn sync_source(&self, source_id: i64) -> Result<Vec<Article>, SyncError> {
        let source = self
            .db
            .get_source(source_id)
            .await?
            .ok_or(SyncError::SourceNotFound(source_id))?;
        self.sync_loaded_source(&source).await
    }

    async fn sync_loaded_source(&self, source: &Source) -> Result<Vec<Article>, SyncError> {
        let mut seen: HashSet<String> = self
            .db
            .list_links_for_source(source.id)
            .await?
            .into_iter()
            .collect();

        let fetched = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(&source.url))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };

        let mut new_articles = Vec::new();
        let fetch_error = match fetched {
            Ok(items) => {
                let candidates = items.len();
                for item in items {
                    // Also drops repeats within this batch.
                    if !seen.insert(item.link.clone()) {
                        continue;
                    }
                    if let Some(article) = self.db.insert_article(source.id, &item).await? {
                        new_articles.push(article);
                    }
                }
                tracing::debug!(
                    source_id = source.id,
                    candidates = candidates,
                    new = new_articles.len(),
                    "Synced source"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    source_id = source.id,
                    url = %source.url,
                    error = %e,
                    "Feed fetch failed"
                );
                Some(e.to_string())
            }
        };

        if !self
            .db
            .record_source_sync(source.id, fetch_error.as_deref())
            .await?
        {
            tracing::debug!(source_id = source.id, "Source removed during sync");
        }

        Ok(new_articles)
    }

    /// Sync every source, prune to the retention cap, and notify once if
    /// anything new was stored.
    ///
    /// Waits for any all-source pass already in flight to finish first.
    pub async fn sync_all(&self) -> Result<Vec<Article>, SyncError> {
        let _guard = self.pass_lock.lock().await;
        self.run_all_sources_pass().await
    }

    /// Like [`sync_all`](Self::sync_all), but returns `Ok(None)` without
    /// doing anything when another all-source pass is in flight.
    pub async fn try_sync_all(&self) -> Result<Option<Vec<Article>>, SyncError> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            tracing::debug!("Sync pass already running, skipping");
            return Ok(None);
        };
        self.run_all_sources_pass().await.map(Some)
    }

    async fn run_all_sources_pass(&self) -> Result<Vec<Article>, SyncError> {
        let sources = self.db.list_sources().await?;
        let mut new_articles = Vec::new();

        for source in &sources {
            match self.sync_loaded_source(source).await {
                Ok(mut articles) => new_articles.append(&mut articles),
                Err(e) => {
                    // One broken source must not stop the others.
                    tracing::warn!(source_id = source.id, error = %e, "Source sync failed");
                }
            }
        }

        self.prune().await?;

        let delivered = self.notifier.publish(&new_articles);
        tracing::info!(
            sources = sources.len(),
            new = new_articles.len(),
            subscribers = delivered,
            "Sync pass complete"
        );
        Ok(new_articles)
    }

    /// Apply the retention cap to every source now, returning the number of
    /// articles removed. Never interleaves with an all-source pass.
    pub async fn apply_retention(&self) -> Result<u64, SyncError> {
        let _guard = self.pass_lock.lock().await;
        self.prune().await
    }

    async fn prune(&self) -> Result<u64, SyncError> {
        let cap = self.db.get_settings().await?.max_articles_per_source;
        let removed = self.db.prune_to_retention_cap(cap).await?;
        if removed > 0 {
            tracing::info!(removed = removed, cap = cap, "Pruned articles over retention cap");
        }
        Ok(removed)
    }

    // ========================================================================
    // Source Management
    // ========================================================================

    /// Validate, persist, and immediately sync a new source.
    ///
    /// A blank `name` falls back to the URL. The returned source reflects
    /// the initial sync (`last_synced`, `last_error`).
    pub async fn add_source(
        &self,
        name: &str,
        url: &str,
        category: Option<&str>,
    ) -> Result<Source, SyncError> {
        let url = checked_url(url)?;
        let source = self
            .db
            .insert_source(&NewSource {
                name: clean_label(name).unwrap_or_else(|| url.clone()),
                url,
                category: category.and_then(clean_label),
            })
            .await?;
        tracing::info!(source_id = source.id, url = %source.url, "Added source");

        if let Err(e) = self.sync_loaded_source(&source).await {
            tracing::warn!(source_id = source.id, error = %e, "Initial sync failed");
        }
        Ok(self.db.get_source(source.id).await?.unwrap_or(source))
    }

    /// Save edits to `source`, which must carry the version it was read at.
    ///
    /// A changed URL is validated first and triggers a sync pass after the
    /// update lands; name or category edits alone do not.
    pub async fn update_source(&self, source: &Source) -> Result<Source, SyncError> {
        let stored = self
            .db
            .get_source(source.id)
            .await?
            .ok_or(SyncError::SourceNotFound(source.id))?;

        let url_changed = source.url.trim() != stored.url;
        let url = if url_changed {
            checked_url(&source.url)?
        } else {
            stored.url.clone()
        };

        let edited = Source {
            name: clean_label(&source.name).unwrap_or_else(|| url.clone()),
            url,
            category: source.category.as_deref().and_then(clean_label),
            ..source.clone()
        };
        let updated = self.db.update_source(&edited).await?;

        if !url_changed {
            return Ok(updated);
        }

        tracing::info!(source_id = updated.id, url = %updated.url, "Source URL changed, re-syncing");
        if let Err(e) = self.sync_loaded_source(&updated).await {
            tracing::warn!(source_id = updated.id, error = %e, "Re-sync after URL change failed");
        }
        Ok(self.db.get_source(updated.id).await?.unwrap_or(updated))
    }

    /// Delete a source and all of its articles. Returns false if absent.
    pub async fn delete_source(&self, source_id: i64) -> Result<bool, SyncError> {
        Ok(self.db.delete_source(source_id).await?)
    }

    // ========================================================================
    // OPML
    // ========================================================================

    /// Add every feed outline in `content` as a source, skipping (and
    /// counting) the ones that fail.
    pub async fn import_opml(&self, content: &str) -> Result<ImportReport, SyncError> {
        let feeds = feed::parse_opml_content(content)?;
        let mut report = ImportReport::default();

        for opml_feed in feeds {
            match self
                .add_source(&opml_feed.title, &opml_feed.xml_url, opml_feed.category.as_deref())
                .await
            {
                Ok(_) => report.imported += 1,
                Err(e) => {
                    tracing::warn!(url = %opml_feed.xml_url, error = %e, "Skipping OPML feed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            imported = report.imported,
            failed = report.failed,
            "OPML import complete"
        );
        Ok(report)
    }

    pub async fn import_opml_file(&self, path: &Path) -> Result<ImportReport, SyncError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(feed::OpmlError::from)?;
        self.import_opml(&content).await
    }

    /// Render every source as an OPML document.
    pub async fn export_opml(&self) -> Result<String, SyncError> {
        Ok(feed::export_opml(&self.opml_feeds().await?)?)
    }

    /// Write every source to `path` as OPML, replacing it atomically.
    pub async fn export_opml_to_file(&self, path: &Path) -> Result<usize, SyncError> {
        let feeds = self.opml_feeds().await?;
        feed::export_to_file(&feeds, path)?;
        Ok(feeds.len())
    }

    async fn opml_feeds(&self) -> Result<Vec<OpmlFeed>, SyncError> {
        Ok(self
            .db
            .list_sources()
            .await?
            .into_iter()
            .map(|s| OpmlFeed {
                title: s.name,
                xml_url: s.url,
                category: s.category,
            })
            .collect())
    }

    // ========================================================================
    // Queries and Flags
    // ========================================================================

    pub async fn sources(&self) -> Result<Vec<Source>, SyncError> {
        Ok(self.db.list_sources().await?)
    }

    pub async fn source(&self, source_id: i64) -> Result<Option<Source>, SyncError> {
        Ok(self.db.get_source(source_id).await?)
    }

    pub async fn articles_for_source(&self, source_id: i64) -> Result<Vec<Article>, SyncError> {
        if self.db.get_source(source_id).await?.is_none() {
            return Err(SyncError::SourceNotFound(source_id));
        }
        Ok(self.db.list_articles_for_source(source_id).await?)
    }

    pub async fn unread_articles(&self) -> Result<Vec<Article>, SyncError> {
        Ok(self.db.list_unread_articles().await?)
    }

    pub async fn favorite_articles(&self) -> Result<Vec<Article>, SyncError> {
        Ok(self.db.list_favorite_articles().await?)
    }

    pub async fn article(&self, article_id: i64) -> Result<Option<Article>, SyncError> {
        Ok(self.db.get_article(article_id).await?)
    }

    pub async fn mark_read(&self, article_id: i64) -> Result<bool, SyncError> {
        Ok(self.db.mark_article_read(article_id).await?)
    }

    /// Flip the favorite flag; `None` if the article does not exist.
    pub async fn toggle_favorite(&self, article_id: i64) -> Result<Option<bool>, SyncError> {
        Ok(self.db.toggle_article_favorite(article_id).await?)
    }

    pub async fn mark_all_read(&self) -> Result<u64, SyncError> {
        Ok(self.db.mark_all_read().await?)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub async fn settings(&self) -> Result<Settings, SyncError> {
        Ok(self.db.get_settings().await?)
    }

    /// Persist new settings. Both values must be positive; `settings.version`
    /// must match the stored one.
    pub async fn update_settings(&self, settings: &Settings) -> Result<Settings, SyncError> {
        if settings.refresh_interval_minutes <= 0 {
            return Err(SyncError::InvalidSettings(format!(
                "refresh interval must be positive, got {}",
                settings.refresh_interval_minutes
            )));
        }
        if settings.max_articles_per_source <= 0 {
            return Err(SyncError::InvalidSettings(format!(
                "retention cap must be positive, got {}",
                settings.max_articles_per_source
            )));
        }
        Ok(self.db.update_settings(settings).await?)
    }
}

/// Trimmed URL if it is an absolute http/https URL.
fn checked_url(url: &str) -> Result<String, SyncError> {
    let trimmed = url.trim();
    match validate_url(trimmed) {
        Ok(_) => Ok(trimmed.to_string()),
        Err(e) => {
            tracing::debug!(url = %trimmed, error = %e, "Rejected feed URL");
            Err(SyncError::InvalidFeedUrl(url.to_string()))
        }
    }
}
