use crate::feed::types::{RawItem, SourceDescriptor};
use feed_rs::parser;
use std::sync::Arc;

/// Parse an RSS or Atom document into raw items tagged with `source`.
///
/// Entries without a publication (or update) date are kept here with
/// `published: None`; the cycle drops them.
pub fn parse_feed(
    bytes: &[u8],
    source: &SourceDescriptor,
) -> Result<Vec<RawItem>, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let feed_title = feed
        .title
        .map(|t| t.content)
        .unwrap_or_else(|| source.title.to_string());

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());
            let published = entry.published.or(entry.updated);
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());

            RawItem {
                title,
                description,
                link,
                published,
                source: feed_title.clone(),
                source_title: Arc::clone(&source.title),
                source_color: Arc::clone(&source.color),
                source_url: Arc::clone(&source.url),
            }
        })
        .collect();

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn source() -> SourceDescriptor {
        SourceDescriptor::new("https://example.com/rss", "Example", "#ff8700")
    }

    #[test]
    fn test_parse_rss_items() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example Daily</title>
    <item>
        <title>First</title>
        <link>https://example.com/1</link>
        <description>One</description>
        <pubDate>Fri, 01 Mar 2024 12:00:00 GMT</pubDate>
    </item>
    <item>
        <title>Second</title>
        <link>https://example.com/2</link>
    </item>
</channel></rss>"#;

        let items = parse_feed(rss.as_bytes(), &source()).unwrap();
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].title, "First");
        assert_eq!(items[0].description, "One");
        assert_eq!(items[0].link.as_deref(), Some("https://example.com/1"));
        assert_eq!(
            items[0].published,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(items[0].source, "Example Daily");
        assert_eq!(&*items[0].source_title, "Example");
        assert_eq!(&*items[0].source_color, "#ff8700");

        assert!(items[1].published.is_none());
    }

    #[test]
    fn test_parse_atom_uses_updated_when_no_published() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Atom Example</title>
    <id>urn:uuid:feed</id>
    <updated>2024-03-02T08:00:00Z</updated>
    <entry>
        <title>Atom entry</title>
        <id>urn:uuid:entry-1</id>
        <link href="https://example.com/atom/1"/>
        <updated>2024-03-02T08:00:00Z</updated>
        <summary>Short</summary>
    </entry>
</feed>"#;

        let items = parse_feed(atom.as_bytes(), &source()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Atom entry");
        assert_eq!(items[0].description, "Short");
        assert_eq!(
            items[0].published,
            Some(Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_missing_title_defaults_to_untitled() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><description>No title here</description></item>
</channel></rss>"#;

        let items = parse_feed(rss.as_bytes(), &source()).unwrap();
        assert_eq!(items[0].title, "Untitled");
        // Channel without a title falls back to the configured one
        assert_eq!(items[0].source, "Example");
    }

    #[test]
    fn test_invalid_xml_is_an_error() {
        assert!(parse_feed(b"<not valid xml", &source()).is_err());
    }
}
