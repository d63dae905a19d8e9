//! Consumer-side dedup and ordering.
//!
//! Every cycle re-delivers most of what the previous cycle delivered, so
//! membership is checked against a fingerprint set before anything touches
//! the ordered list. New articles are placed with a binary search; ties on
//! the timestamp keep first-seen order.

use crate::feed::Article;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Dedup key: SHA-256 over the article title and its source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFingerprint([u8; 32]);

impl ContentFingerprint {
    pub fn of(article: &Article) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(article.title.as_bytes());
        // Unit separator keeps ("ab", "c") and ("a", "bc") apart
        hasher.update([0x1f]);
        hasher.update(article.source_url.as_bytes());
        Self(hasher.finalize().into())
    }
}

/// Deduplicated articles, newest first.
///
/// Single writer: whoever owns the set is responsible for serializing
/// calls to [`WorkingSet::insert`].
#[derive(Debug, Default)]
pub struct WorkingSet {
    seen: HashSet<ContentFingerprint>,
    articles: Vec<Article>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one article. Returns `false` when its fingerprint was already seen.
    pub fn insert(&mut self, article: Article) -> bool {
        if !self.seen.insert(ContentFingerprint::of(&article)) {
            return false;
        }

        // First index holding something strictly older; equal timestamps stay ahead.
        let pos = self
            .articles
            .partition_point(|existing| existing.published >= article.published);
        self.articles.insert(pos, article);
        true
    }

    pub fn contains(&self, article: &Article) -> bool {
        self.seen.contains(&ContentFingerprint::of(article))
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Article> {
        self.articles.iter()
    }

    pub fn as_slice(&self) -> &[Article] {
        &self.articles
    }

    /// Forget everything, including the seen fingerprints.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.articles.clear();
    }
}

impl<'a> IntoIterator for &'a WorkingSet {
    type Item = &'a Article;
    type IntoIter = std::slice::Iter<'a, Article>;

    fn into_iter(self) -> Self::IntoIter {
        self.articles.iter()
    }
}
