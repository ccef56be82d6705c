use std::sync::Arc;
use tokio::sync::broadcast;

use crate::storage::Article;

/// Capacity used when none is configured.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

/// Raised once per all-source pass that persisted at least one article.
#[derive(Debug, Clone)]
pub struct NewArticles {
    /// Every article the pass persisted, in the order they were stored.
    pub articles: Arc<[Article]>,
}

impl NewArticles {
    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}

/// Fan-out point for [`NewArticles`] events.
///
/// Subscribers hold a broadcast receiver; dropping it unsubscribes. A
/// subscriber that falls more than `capacity` events behind loses the
/// oldest ones (`RecvError::Lagged`) rather than blocking sync passes.
#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    tx: broadcast::Sender<NewArticles>,
}

impl Notifier {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<NewArticles> {
        self.tx.subscribe()
    }

    /// Publish `articles` unless empty. Returns the number of subscribers
    /// that received the event.
    pub(crate) fn publish(&self, articles: &[Article]) -> usize {
        if articles.is_empty() {
            return 0;
        }
        let event = NewArticles {
            articles: Arc::from(articles),
        };
        // No subscribers is not an error.
        self.tx.send(event).unwrap_or(0)
    }
}
