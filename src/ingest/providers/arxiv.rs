// src/ingest/providers/arxiv.rs
//! arXiv export API (Atom), newest submissions first.

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use url::Url;

use crate::article::{PaperMeta, Source};
use crate::config::SourceConfig;
use crate::ingest::providers::feed::{parse_feed, FeedEntry};
use crate::ingest::types::{Candidate, SourceProvider};

pub const ARXIV_PDF_BASE: &str = "https://arxiv.org/pdf";
/// Used when no usable category is configured.
pub const DEFAULT_CATEGORY: &str = "cs.LG";

pub struct ArxivProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl ArxivProvider {
    pub fn from_fixture_str(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_config(cfg: &SourceConfig, client: reqwest::Client) -> Self {
        Self {
            mode: Mode::Http {
                url: query_url(&cfg.feed_url, &cfg.categories, cfg.max_articles),
                client,
            },
        }
    }

    fn to_candidates(entries: Vec<FeedEntry>) -> Vec<Candidate> {
        let out: Vec<Candidate> = entries.into_iter().map(paper_candidate).collect();
        counter!("ingest_candidates_total", "source" => Source::Arxiv.as_str()).increment(out.len() as u64);
        out
    }
}

/// `search_query=cat:A OR cat:B`, sorted by submission date, descending.
pub fn query_url(base: &str, categories: &[String], max_results: usize) -> String {
    let mut cats: Vec<&str> = categories
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if cats.is_empty() {
        cats.push(DEFAULT_CATEGORY);
    }
    let query = cats
        .iter()
        .map(|c| format!("cat:{c}"))
        .collect::<Vec<_>>()
        .join(" OR ");
    let max = max_results.to_string();
    let params = [
        ("search_query", query.as_str()),
        ("start", "0"),
        ("max_results", max.as_str()),
        ("sortBy", "submittedDate"),
        ("sortOrder", "descending"),
    ];
    match Url::parse_with_params(base, &params) {
        Ok(u) => u.to_string(),
        Err(_) => base.to_string(),
    }
}

/// `http://arxiv.org/abs/2411.01234v1` -> `2411.01234v1`
pub fn arxiv_id_from(entry_id: &str) -> String {
    let last = entry_id.trim().trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    last.trim_end_matches(".pdf").to_string()
}

fn paper_candidate(e: FeedEntry) -> Candidate {
    let arxiv_id = arxiv_id_from(e.id.as_deref().unwrap_or(&e.link));
    let pdf_url = format!("{ARXIV_PDF_BASE}/{arxiv_id}.pdf");
    Candidate {
        title: e.title,
        link: e.link,
        published: e.published,
        bad_date: e.bad_date,
        // the abstract is the text that gets summarized and scored
        summary: e.summary.clone(),
        content: e.summary,
        paper: Some(PaperMeta {
            arxiv_id,
            authors: e.authors,
            categories: e.categories,
            pdf_url: Some(pdf_url),
            pdf_path: None,
            citations: Default::default(),
        }),
    }
}

#[async_trait]
impl SourceProvider for ArxivProvider {
    async fn fetch_candidates(&self) -> Result<Vec<Candidate>> {
        let parsed = match &self.mode {
            Mode::Fixture(s) => parse_feed(s, None),
            Mode::Http { url, client } => {
                let body = match client.get(url).send().await.and_then(|r| r.error_for_status()) {
                    Ok(resp) => resp.text().await.context("arxiv http .text()")?,
                    Err(e) => {
                        tracing::warn!(target: "ingest", error = ?e, provider = "arxiv", "provider http error");
                        counter!("ingest_provider_errors_total", "source" => Source::Arxiv.as_str()).increment(1);
                        return Err(e).context("arxiv http get()");
                    }
                };
                parse_feed(&body, None)
            }
        };
        match parsed {
            Ok(entries) => Ok(Self::to_candidates(entries)),
            Err(e) => {
                counter!("ingest_provider_errors_total", "source" => Source::Arxiv.as_str()).increment(1);
                Err(e.context("arxiv feed"))
            }
        }
    }

    fn source(&self) -> Source {
        Source::Arxiv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARXIV_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query</title>
  <entry>
    <id>http://arxiv.org/abs/2411.01234v1</id>
    <published>2024-11-03T17:59:58Z</published>
    <title>Scaling Laws for
      Agents</title>
    <summary>We study how agent performance scales with compute.</summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <link href="http://arxiv.org/abs/2411.01234v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2411.01234v1" rel="related" type="application/pdf"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.AI" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
</feed>"#;

    #[test]
    fn query_url_joins_categories() {
        let u = query_url(
            "http://export.arxiv.org/api/query",
            &["cs.LG".to_string(), "cs.AI".to_string()],
            10,
        );
        assert!(u.starts_with("http://export.arxiv.org/api/query?search_query=cat%3Acs.LG+OR+cat%3Acs.AI"));
        assert!(u.contains("max_results=10"));
        assert!(u.contains("sortBy=submittedDate"));
    }

    #[test]
    fn no_categories_falls_back_to_machine_learning() {
        let u = query_url("http://export.arxiv.org/api/query", &[], 5);
        assert!(u.contains("search_query=cat%3Acs.LG&"), "{u}");
        let blank = query_url("http://export.arxiv.org/api/query", &[" ".to_string()], 5);
        assert_eq!(blank, u);
    }

    #[test]
    fn ids_come_from_the_last_path_segment() {
        assert_eq!(arxiv_id_from("http://arxiv.org/abs/2411.01234v1"), "2411.01234v1");
        assert_eq!(arxiv_id_from("https://arxiv.org/pdf/2411.01234v1.pdf"), "2411.01234v1");
    }

    #[tokio::test]
    async fn entries_become_paper_candidates() {
        let c = ArxivProvider::from_fixture_str(ARXIV_XML)
            .fetch_candidates()
            .await
            .unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].title, "Scaling Laws for Agents");
        assert_eq!(c[0].link, "http://arxiv.org/abs/2411.01234v1");
        let paper = c[0].paper.as_ref().unwrap();
        assert_eq!(paper.arxiv_id, "2411.01234v1");
        assert_eq!(paper.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(paper.categories, vec!["cs.LG", "cs.AI"]);
        assert_eq!(paper.pdf_url.as_deref(), Some("https://arxiv.org/pdf/2411.01234v1.pdf"));
    }
}
