//! Sync orchestration: the engine that merges feeds into the store, the
//! scheduler that drives it, and the notification channel it reports on.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use feedkeeper::feed::{FetchOptions, HttpFeedFetcher};
//! use feedkeeper::storage::Database;
//! use feedkeeper::sync::{Scheduler, SyncEngine};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open(":memory:").await?;
//! let fetcher = Arc::new(HttpFeedFetcher::new(FetchOptions::default())?);
//! let engine = Arc::new(SyncEngine::new(db, fetcher));
//!
//! let mut events = engine.subscribe();
//! engine.add_source("Example", "https://example.com/feed.xml", None).await?;
//!
//! let scheduler = Scheduler::start(engine.clone()).await?;
//! if let Ok(event) = events.recv().await {
//!     println!("{} new articles", event.len());
//! }
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod notify;
mod scheduler;

pub use engine::{ImportReport, SyncEngine, DEFAULT_FETCH_TIMEOUT};
pub use error::SyncError;
pub use notify::{NewArticles, DEFAULT_NOTIFICATION_CAPACITY};
pub use scheduler::{minutes_to_period, Scheduler};
