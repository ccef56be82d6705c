//! Feed synchronization core: scheduled fetching of RSS/Atom sources,
//! link-keyed deduplication, per-source retention and new-article
//! notifications, persisted in SQLite.
//!
//! - [`storage`]: the SQLite-backed source, article and settings stores
//! - [`feed`]: fetching, parsing and OPML import/export
//! - [`sync`]: the sync engine, scheduler and notification channel
//! - [`config`]: process configuration loaded from TOML
//! - [`util`]: URL validation and text helpers

pub mod config;
pub mod feed;
pub mod storage;
pub mod sync;
pub mod util;
