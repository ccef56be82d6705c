use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::util::clean_label;

/// Maximum allowed nesting depth for OPML outline elements.
/// Deeper documents are rejected rather than walked.
const MAX_OPML_DEPTH: usize = 50;

const UNNAMED_FEED: &str = "Unnamed Feed";
const EXPORT_TITLE: &str = "feedkeeper subscriptions";

/// Errors that can occur during OPML import or export.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML could not be read or written.
    #[error("XML error: {0}")]
    XmlParse(String),

    /// File I/O error.
    #[error("OPML file error: {0}")]
    Io(#[from] std::io::Error),
}

fn xml_error(e: impl std::fmt::Display) -> OpmlError {
    OpmlError::XmlParse(e.to_string())
}

/// A feed subscription as it appears in an OPML outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    /// `title` attribute, falling back to `text`, then "Unnamed Feed".
    pub title: String,
    /// The `xmlUrl` attribute, unvalidated.
    pub xml_url: String,
    /// Explicit `category` attribute, or the text of the enclosing folder outline.
    pub category: Option<String>,
}

/// Reads an OPML file from disk and extracts its feed outlines.
pub async fn parse_opml_file(path: &Path) -> Result<Vec<OpmlFeed>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml_content(&content)
}

/// Extracts feed outlines from an OPML document, in document order.
///
/// An outline is a feed when its `type` is `rss` (any case) and it carries a
/// non-empty `xmlUrl`. Other outlines are treated as folders: they are
/// walked, and their text becomes the category of the feeds inside them.
/// URLs are not validated here; adding the source does that.
///
/// quick-xml never expands `<!ENTITY>` declarations, so custom entity
/// references fail to decode instead of pulling in external content.
pub fn parse_opml_content(content: &str) -> Result<Vec<OpmlFeed>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    // One entry per open <outline>; folders contribute their label.
    let mut folders: Vec<Option<String>> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                if folders.len() >= MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                let outline = read_outline(&e, &reader)?;
                let folder_label = match outline.into_feed(&folders) {
                    Some(feed) => {
                        feeds.push(feed);
                        None
                    }
                    None => outline_label(&e, &reader)?,
                };
                folders.push(folder_label);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                if let Some(feed) = read_outline(&e, &reader)?.into_feed(&folders) {
                    feeds.push(feed);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                folders.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
    }

    Ok(feeds)
}

/// Raw attributes of one `<outline>`.
#[derive(Default)]
struct Outline {
    kind: Option<String>,
    xml_url: Option<String>,
    title: Option<String>,
    text: Option<String>,
    category: Option<String>,
}

impl Outline {
    fn into_feed(self, folders: &[Option<String>]) -> Option<OpmlFeed> {
        let is_rss = self
            .kind
            .as_deref()
            .is_some_and(|k| k.trim().eq_ignore_ascii_case("rss"));
        let xml_url = self.xml_url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());

        match (is_rss, xml_url) {
            (true, Some(xml_url)) => Some(OpmlFeed {
                title: self
                    .title
                    .or(self.text)
                    .unwrap_or_else(|| UNNAMED_FEED.to_string()),
                xml_url,
                category: self
                    .category
                    .or_else(|| folders.iter().rev().find_map(|f| f.clone())),
            }),
            (false, Some(url)) => {
                tracing::debug!(url = %url, "Skipping outline without type=\"rss\"");
                None
            }
            _ => None,
        }
    }
}

fn read_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Outline, OpmlError> {
    let mut outline = Outline::default();
    let decoder = reader.decoder();

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || -> Result<String, OpmlError> {
            Ok(attr
                .decode_and_unescape_value(decoder)
                .map_err(xml_error)?
                .into_owned())
        };
        match attr.key.as_ref() {
            b"type" => outline.kind = Some(value()?),
            b"xmlUrl" => outline.xml_url = Some(value()?),
            b"title" => outline.title = clean_label(&value()?),
            b"text" => outline.text = clean_label(&value()?),
            b"category" => outline.category = clean_label(value()?.trim_matches('/')),
            _ => {}
        }
    }

    Ok(outline)
}

/// Folder label: `text`, falling back to `title`.
fn outline_label(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Option<String>, OpmlError> {
    let outline = read_outline(e, reader)?;
    Ok(outline.text.or(outline.title))
}

/// Renders feed subscriptions as an OPML 2.0 document.
///
/// Each feed becomes `<outline type="rss" text title xmlUrl [category]/>`,
/// with `text` and `title` both set to the feed title. The head carries a
/// title and an RFC 2822 `dateCreated`.
pub fn export_opml(feeds: &[OpmlFeed]) -> Result<String, OpmlError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(opml)).map_err(xml_error)?;

    // <head>
    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .map_err(xml_error)?;
    write_text_element(&mut writer, "title", EXPORT_TITLE)?;
    write_text_element(&mut writer, "dateCreated", &chrono::Utc::now().to_rfc2822())?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .map_err(xml_error)?;

    // <body>
    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .map_err(xml_error)?;

    for feed in feeds {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", feed.title.as_str()));
        outline.push_attribute(("title", feed.title.as_str()));
        outline.push_attribute(("xmlUrl", feed.xml_url.as_str()));
        if let Some(ref category) = feed.category {
            outline.push_attribute(("category", category.as_str()));
        }
        writer.write_event(Event::Empty(outline)).map_err(xml_error)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .map_err(xml_error)?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(xml_error)
}

fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> Result<(), OpmlError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)?;
    Ok(())
}

/// Exports feed subscriptions to an OPML file atomically.
///
/// The document is written to a temporary sibling file, synced, then renamed
/// over `path`, so the destination is never left half-written.
pub fn export_to_file(feeds: &[OpmlFeed], path: &Path) -> Result<(), OpmlError> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = export_opml(feeds)?;

    // Unpredictable temp name; create_new refuses to follow a planted file.
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let write_temp = || -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        std::io::Write::write_all(&mut file, content.as_bytes())?;
        file.sync_all()?;
        Ok(())
    };

    if let Err(e) = write_temp().and_then(|()| std::fs::rename(&temp_path, path)) {
        let _ = std::fs::remove_file(&temp_path);
        tracing::warn!(path = %path.display(), error = %e, "OPML export failed");
        return Err(OpmlError::Io(e));
    }

    tracing::info!(path = %path.display(), feeds = feeds.len(), "Exported OPML");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_nested_outlines_with_folder_category() {
        let content = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Test Feeds</title></head>
  <body>
    <outline text="Blogs" title="Blogs">
      <outline type="rss" text="Example Blog" title="Example Blog" xmlUrl="https://example.com/feed.xml"/>
      <outline type="rss" text="Tagged" xmlUrl="https://tagged.com/rss" category="News"/>
    </outline>
    <outline type="rss" text="Top Level" xmlUrl="https://top.com/rss"/>
  </body>
</opml>"#;

        let feeds = parse_opml_content(content).unwrap();
        assert_eq!(
            feeds,
            vec![
                OpmlFeed {
                    title: "Example Blog".to_string(),
                    xml_url: "https://example.com/feed.xml".to_string(),
                    category: Some("Blogs".to_string()),
                },
                OpmlFeed {
                    title: "Tagged".to_string(),
                    xml_url: "https://tagged.com/rss".to_string(),
                    category: Some("News".to_string()),
                },
                OpmlFeed {
                    title: "Top Level".to_string(),
                    xml_url: "https://top.com/rss".to_string(),
                    category: None,
                },
            ]
        );
    }

    #[test]
    fn test_title_fallbacks() {
        let content = r#"<?xml version="1.0"?>
<opml version="2.0"><body>
    <outline type="rss" text="Text Only" xmlUrl="https://textonly.com/feed"/>
    <outline type="rss" xmlUrl="https://notitle.com/feed"/>
</body></opml>"#;

        let feeds = parse_opml_content(content).unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].title, "Text Only");
        assert_eq!(feeds[1].title, "Unnamed Feed");
    }

    #[test]
    fn test_requires_rss_type_and_xml_url() {
        let content = r#"<?xml version="1.0"?>
<opml version="2.0"><body>
    <outline type="RSS" text="Upper" xmlUrl="https://upper.com/feed"/>
    <outline text="No type" xmlUrl="https://notype.com/feed"/>
    <outline type="link" text="Link" xmlUrl="https://link.com/feed"/>
    <outline type="rss" text="Empty url" xmlUrl="  "/>
    <outline type="rss" text="Missing url"/>
</body></opml>"#;

        let feeds = parse_opml_content(content).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].xml_url, "https://upper.com/feed");
    }

    #[test]
    fn test_invalid_urls_are_passed_through() {
        let content = r#"<?xml version="1.0"?>
<opml version="2.0"><body>
    <outline type="rss" text="Bad" xmlUrl="ftp://internal.server/feed"/>
</body></opml>"#;

        let feeds = parse_opml_content(content).unwrap();
        assert_eq!(feeds[0].xml_url, "ftp://internal.server/feed");
    }

    #[test]
    fn test_empty_opml() {
        let content = r#"<?xml version="1.0"?><opml version="2.0"><body></body></opml>"#;
        assert!(parse_opml_content(content).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_xml_error() {
        let result = parse_opml_content("<opml><body><outline></body>");
        assert!(matches!(result, Err(OpmlError::XmlParse(_))));
    }

    #[test]
    fn test_external_entity_not_expanded() {
        let malicious_opml = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<opml version="2.0">
    <body>
        <outline type="rss" text="&xxe;" xmlUrl="https://example.com/feed.xml"/>
    </body>
</opml>"#;

        match parse_opml_content(malicious_opml) {
            Ok(feeds) => {
                for feed in &feeds {
                    assert!(!feed.title.contains("root:"), "Entity expanded: {}", feed.title);
                }
            }
            Err(_) => {
                // Rejection (unrecognized entity) is the expected behavior
            }
        }
    }

    #[test]
    fn test_deeply_nested_opml_rejected() {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for _ in 0..100 {
            opml.push_str(r#"<outline text="level">"#);
        }
        for _ in 0..100 {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let err = parse_opml_content(&opml).unwrap_err();
        assert!(matches!(err, OpmlError::MaxDepthExceeded(50)));
    }

    #[test]
    fn test_nesting_at_depth_limit_allowed() {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for i in 0..50 {
            opml.push_str(&format!(r#"<outline text="level{}">"#, i));
        }
        opml.push_str(r#"<outline type="rss" text="Deep Feed" xmlUrl="https://deep.example.com/feed"/>"#);
        for _ in 0..50 {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let feeds = parse_opml_content(&opml).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title, "Deep Feed");
        // Innermost folder wins
        assert_eq!(feeds[0].category.as_deref(), Some("level49"));
    }

    #[test]
    fn test_export_then_parse_preserves_feeds() {
        let original = vec![
            OpmlFeed {
                title: "Feed with <special> & \"chars\"".to_string(),
                xml_url: "https://example.com/feed?a=1&b=2".to_string(),
                category: Some("Tech".to_string()),
            },
            OpmlFeed {
                title: "Plain".to_string(),
                xml_url: "https://plain.com/rss".to_string(),
                category: None,
            },
        ];

        let exported = export_opml(&original).unwrap();
        assert!(exported.contains("<dateCreated>"));
        assert!(exported.contains(r#"type="rss""#));

        let parsed = parse_opml_content(&exported).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_export_empty() {
        let exported = export_opml(&[]).unwrap();
        assert!(exported.contains("<?xml"));
        assert!(exported.contains("<title>feedkeeper subscriptions</title>"));
        assert!(parse_opml_content(&exported).unwrap().is_empty());
    }

    #[test]
    fn test_export_to_file() {
        let feeds = vec![OpmlFeed {
            title: "File Export Test".to_string(),
            xml_url: "https://example.com/feed.xml".to_string(),
            category: None,
        }];

        let dir = std::env::temp_dir().join(format!("feedkeeper_opml_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("export.opml");

        export_to_file(&feeds, &path).unwrap();
        // Overwrites an existing export
        export_to_file(&feeds, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed = parse_opml_content(&content).unwrap();
        assert_eq!(parsed, feeds);

        let leftovers = std::fs::read_dir(&dir).unwrap().count();
        assert_eq!(leftovers, 1, "temp files should be renamed away");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_parse_missing_file() {
        let err = parse_opml_file(Path::new("/nonexistent/feedkeeper.opml"))
            .await
            .unwrap_err();
        assert!(matches!(err, OpmlError::Io(_)));
    }
}
