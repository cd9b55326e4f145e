// src/ingest/providers/rss.rs
//! Feed-backed provider used by every news/blog source.

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use url::Url;

use crate::article::Source;
use crate::ingest::providers::feed::{parse_feed, FeedEntry};
use crate::ingest::types::{Candidate, SourceProvider};

pub struct FeedProvider {
    source: Source,
    mode: Mode,
    limit: Option<usize>,
}

enum Mode {
    Fixture(String),
    Http { url: Url, client: reqwest::Client },
}

impl FeedProvider {
    /// Serve `xml` on every fetch; no network.
    pub fn from_fixture_str(source: Source, xml: &str) -> Self {
        Self {
            source,
            mode: Mode::Fixture(xml.to_string()),
            limit: None,
        }
    }

    pub fn from_url(source: Source, url: &str, client: reqwest::Client) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid feed url `{url}`"))?;
        Ok(Self {
            source,
            mode: Mode::Http { url, client },
            limit: None,
        })
    }

    /// Keep at most `n` entries per fetch (feed order).
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    fn to_candidates(&self, entries: Vec<FeedEntry>) -> Vec<Candidate> {
        let take = self.limit.unwrap_or(usize::MAX);
        let out: Vec<Candidate> = entries
            .into_iter()
            .take(take)
            .map(|e| Candidate {
                title: e.title,
                link: e.link,
                published: e.published,
                bad_date: e.bad_date,
                summary: e.summary,
                content: e.content,
                paper: None,
            })
            .collect();
        counter!("ingest_candidates_total", "source" => self.source.as_str()).increment(out.len() as u64);
        out
    }
}

#[async_trait]
impl SourceProvider for FeedProvider {
    async fn fetch_candidates(&self) -> Result<Vec<Candidate>> {
        let entries = match &self.mode {
            Mode::Fixture(s) => parse_feed(s, None),
            Mode::Http { url, client } => {
                let body = match client.get(url.clone()).send().await.and_then(|r| r.error_for_status()) {
                    Ok(resp) => resp.text().await.context("feed http .text()")?,
                    Err(e) => {
                        tracing::warn!(target: "ingest", error = ?e, provider = self.name(), "provider http error");
                        counter!("ingest_provider_errors_total", "source" => self.source.as_str()).increment(1);
                        return Err(e).with_context(|| format!("GET {url}"));
                    }
                };
                parse_feed(&body, Some(url))
            }
        };
        match entries {
            Ok(entries) => Ok(self.to_candidates(entries)),
            Err(e) => {
                counter!("ingest_provider_errors_total", "source" => self.source.as_str()).increment(1);
                Err(e.context(format!("{} feed", self.source)))
            }
        }
    }

    fn source(&self) -> Source {
        self.source
    }
}
