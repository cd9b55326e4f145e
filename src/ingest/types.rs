// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::article::{PaperMeta, Source};

/// Raw item as a provider sees it, before any filtering or enrichment.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Candidate {
    pub title: String,
    pub link: String,
    /// `None` when the upstream had no date; treated as "now" by the recency filter.
    pub published: Option<DateTime<Utc>>,
    /// Date text the provider could not parse. Such candidates are skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_date: Option<String>,
    /// Feed-provided teaser/abstract (normalized text).
    pub summary: Option<String>,
    /// Feed-provided full body (normalized text), when the feed carries it.
    pub content: Option<String>,
    pub paper: Option<PaperMeta>,
}

impl Candidate {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            published: None,
            bad_date: None,
            summary: None,
            content: None,
            paper: None,
        }
    }

    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published = Some(at);
        self
    }

    pub fn with_summary(mut self, s: impl Into<String>) -> Self {
        self.summary = Some(s.into());
        self
    }

    pub fn with_content(mut self, s: impl Into<String>) -> Self {
        self.content = Some(s.into());
        self
    }
}

/// Where candidates come from (feed, API, fixture).
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    /// Bounded list of the upstream's latest items.
    async fn fetch_candidates(&self) -> Result<Vec<Candidate>>;
    fn source(&self) -> Source;
    fn name(&self) -> &'static str {
        self.source().as_str()
    }
}

/// Anything the aggregator can pull new articles from. Implemented by
/// [`SourceAdapter`](crate::ingest::adapter::SourceAdapter).
#[async_trait::async_trait]
pub trait ArticleSource: Send + Sync {
    fn source(&self) -> Source;
    async fn fetch_new_items(&self) -> Result<Vec<crate::article::NormalizedArticle>>;
}

/// Durable home for enriched articles. An adapter saves a batch before marking its links
/// as processed, so a failed save leaves them eligible again.
#[async_trait::async_trait]
pub trait ArticleSink: Send + Sync {
    async fn save_articles(&self, items: &[crate::article::NormalizedArticle]) -> Result<()>;
}
