//! Utility functions shared by the fetch, storage and sync layers.
//!
//! - **URL validation**: the syntactic http/https check applied before a
//!   source is created or re-pointed
//! - **Text processing**: markup stripping and summary truncation for
//!   ingested articles, label cleaning for names and categories
//!
//! # Examples
//!
//! ```
//! use feedkeeper::util::{is_valid_feed_url, summarize};
//!
//! assert!(is_valid_feed_url("https://example.com/feed.xml"));
//! assert_eq!(summarize("<p>Hello</p>"), "Hello");
//! ```

mod text;
mod url_validator;

pub use text::{clean_label, strip_markup, summarize, truncate_chars, SUMMARY_MAX_CHARS};
pub use url_validator::{is_valid_feed_url, validate_url, UrlValidationError};
