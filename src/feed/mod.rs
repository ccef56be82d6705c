//! Feed retrieval, parsing and OPML subscription lists.
//!
//! - **Parsing**: convert RSS/Atom documents into [`CandidateItem`]s
//! - **Fetching**: the [`FeedFetcher`] seam and its HTTP implementation with
//!   retry, timeout and size limits
//! - **OPML**: read and write outline-based subscription lists
//!
//! [`CandidateItem`]: crate::storage::CandidateItem
//!
//! # Example
//!
//! ```no_run
//! use feedkeeper::feed::{FeedFetcher, FetchOptions, HttpFeedFetcher};
//!
//! # async fn demo() -> Result<(), feedkeeper::feed::FetchError> {
//! let fetcher = HttpFeedFetcher::new(FetchOptions::default())?;
//! let items = fetcher.fetch("https://example.com/feed.xml").await?;
//! println!("{} items", items.len());
//! # Ok(())
//! # }
//! ```

mod fetcher;
mod opml;
mod parser;

pub use fetcher::{FeedFetcher, FetchError, FetchOptions, HttpFeedFetcher};
pub use opml::{export_opml, export_to_file, parse_opml_content, parse_opml_file, OpmlError, OpmlFeed};
pub use parser::parse_feed;
