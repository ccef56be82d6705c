use feed_rs::parser;

use crate::storage::CandidateItem;
use crate::util::summarize;

const UNTITLED: &str = "Untitled";

/// Parse an RSS/Atom document into candidate items, in document order.
///
/// Per-entry derivation:
/// - title defaults to "Untitled"
/// - link is the first entry link, or empty
/// - published is the entry's publish date, or the current time if absent
/// - content prefers the entry body and falls back to its summary
/// - summary is the content with markup stripped, truncated to 300 chars
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<CandidateItem>, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;
    let now = chrono::Utc::now().timestamp();

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNTITLED.to_string());
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let published = entry
                .published
                .map(|dt| dt.timestamp())
                .unwrap_or(now);
            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .filter(|c| !c.trim().is_empty());
            let summary = content.as_deref().map(summarize);

            CandidateItem {
                title,
                link,
                published,
                content,
                summary,
            }
        })
        .collect();

    Ok(items)
}
