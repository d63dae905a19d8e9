use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// One configured feed.
///
/// The set of descriptors is fixed for the lifetime of a monitor
/// generation; changing it means stopping and starting again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Feed address (RSS or Atom document URL)
    pub url: Arc<str>,
    /// Display title chosen by the user
    pub title: Arc<str>,
    /// Display color/tag chosen by the user
    pub color: Arc<str>,
}

impl SourceDescriptor {
    pub fn new(
        url: impl Into<Arc<str>>,
        title: impl Into<Arc<str>>,
        color: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            color: color.into(),
        }
    }
}

/// An entry as returned by a single source fetch.
///
/// Not uniquely keyed: the same entry shows up again on every cycle for as
/// long as the feed keeps publishing it.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub title: String,
    pub description: String,
    pub link: Option<String>,
    /// Entries without a publication date never leave the cycle.
    pub published: Option<DateTime<Utc>>,
    /// Feed title as reported by the feed document itself
    pub source: String,
    pub source_title: Arc<str>,
    pub source_color: Arc<str>,
    pub source_url: Arc<str>,
}

impl RawItem {
    /// Promote to an [`Article`], or `None` when the entry carries no date.
    pub fn into_article(self) -> Option<Article> {
        let published = self.published?;
        Some(Article {
            title: self.title,
            description: self.description,
            link: self.link,
            published,
            source: self.source,
            source_title: self.source_title,
            source_color: self.source_color,
            source_url: self.source_url,
        })
    }
}

/// A dated entry that passed the recency window. This is what consumers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub title: String,
    pub description: String,
    pub link: Option<String>,
    pub published: DateTime<Utc>,
    pub source: String,
    pub source_title: Arc<str>,
    pub source_color: Arc<str>,
    pub source_url: Arc<str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(published: Option<DateTime<Utc>>) -> RawItem {
        RawItem {
            title: "Headline".into(),
            description: "Body".into(),
            link: Some("https://example.com/a".into()),
            published,
            source: "Example News".into(),
            source_title: Arc::from("Example"),
            source_color: Arc::from("#ff8700"),
            source_url: Arc::from("https://example.com/feed.xml"),
        }
    }

    #[test]
    fn test_undated_item_has_no_article() {
        assert!(raw(None).into_article().is_none());
    }

    #[test]
    fn test_dated_item_keeps_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let article = raw(Some(ts)).into_article().unwrap();
        assert_eq!(article.published, ts);
        assert_eq!(article.title, "Headline");
        assert_eq!(&*article.source_title, "Example");
        assert_eq!(&*article.source_url, "https://example.com/feed.xml");
    }

    #[test]
    fn test_article_serializes_to_json() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let article = raw(Some(ts)).into_article().unwrap();
        let json = serde_json::to_value(&article).unwrap();
        assert_eq!(json["title"], "Headline");
        assert_eq!(json["source_title"], "Example");
        assert_eq!(json["published"], "2024-03-01T12:00:00Z");
    }
}
