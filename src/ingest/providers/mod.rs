// src/ingest/providers/mod.rs
pub mod arxiv;
pub mod feed;
pub mod rss;

use std::sync::Arc;

use anyhow::Result;

use crate::article::Source;
use crate::config::SourceConfig;
use crate::ingest::types::SourceProvider;

/// Live HTTP provider for a configured source.
pub fn http_provider(cfg: &SourceConfig, client: reqwest::Client) -> Result<Arc<dyn SourceProvider>> {
    Ok(match cfg.source {
        Source::Arxiv => Arc::new(arxiv::ArxivProvider::from_config(cfg, client)),
        other => Arc::new(rss::FeedProvider::from_url(other, &cfg.feed_url, client)?.limit(cfg.max_articles * 3)),
    })
}
