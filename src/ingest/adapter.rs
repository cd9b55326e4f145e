// src/ingest/adapter.rs
//! Per-source incremental fetch + enrich.
//!
//! One run walks `Idle -> FetchingCandidates -> FilteringByRecency -> FilteringByProcessed
//! -> Enriching -> PersistingLedger -> Idle`. Enrichment is serialized with a fixed delay
//! between items. Every `flush_every` items, and once more at the end, the enriched articles
//! are saved to the sink and only then marked and flushed to the processed ledger. A crash
//! mid-batch only forgets the tail of the run. A failed save leaves those links unmarked and
//! keeps the articles in memory for the next run's save.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::article::{NormalizedArticle, Source, NOT_ENOUGH_TEXT, SUMMARY_FAILED};
use crate::citation::{citations_for, CitationStyle, PaperRef};
use crate::clock::SharedClock;
use crate::config::SourceConfig;
use crate::ingest::fetch::{download_pdf, pdf_file_name, TextFetcher};
use crate::ingest::ledger::ProcessedLedger;
use crate::ingest::types::{ArticleSink, ArticleSource, Candidate, SourceProvider};
use crate::ingest::{ensure_metrics_described, extract_keywords};
use crate::model::SUMMARY_MAX_TOKENS;
use crate::relevance::RelevanceScorer;

/// Texts shorter than this are not worth a model call.
pub const MIN_SUMMARY_INPUT_CHARS: usize = 100;
const MAX_ARTICLE_KEYWORDS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Idle,
    FetchingCandidates,
    FilteringByRecency,
    FilteringByProcessed,
    Enriching,
    PersistingLedger,
}

/// Collaborators shared by every adapter of one pipeline.
#[derive(Clone)]
pub struct AdapterContext {
    pub scorer: RelevanceScorer,
    pub fetcher: Arc<dyn TextFetcher>,
    pub clock: SharedClock,
    pub ledger_dir: PathBuf,
    pub pdf_dir: PathBuf,
    /// Needed only when a source downloads PDFs.
    pub http: Option<reqwest::Client>,
    /// Where enriched articles are saved before their links count as processed.
    pub sink: Option<Arc<dyn ArticleSink>>,
}

/// An enriched article plus the publication time its feed gave (if any).
struct Enriched {
    article: NormalizedArticle,
    published: Option<DateTime<Utc>>,
}

/// Per-adapter run state. One lock, so runs on one adapter queue up.
struct RunBook {
    ledger: ProcessedLedger,
    /// Enriched but not yet saved; their links are not in the ledger.
    unsaved: Vec<Enriched>,
}

pub struct SourceAdapter {
    cfg: SourceConfig,
    provider: Arc<dyn SourceProvider>,
    ctx: AdapterContext,
    book: Mutex<RunBook>,
    state: std::sync::Mutex<AdapterState>,
}

impl SourceAdapter {
    pub fn new(cfg: SourceConfig, provider: Arc<dyn SourceProvider>, ctx: AdapterContext) -> Self {
        ensure_metrics_described();
        let ledger = ProcessedLedger::load(
            &ctx.ledger_dir,
            cfg.source,
            Some(cfg.ledger_retention()),
            ctx.clock.clone(),
        );
        Self {
            cfg,
            provider,
            ctx,
            book: Mutex::new(RunBook {
                ledger,
                unsaved: Vec::new(),
            }),
            state: std::sync::Mutex::new(AdapterState::Idle),
        }
    }

    pub fn source(&self) -> Source {
        self.cfg.source
    }

    pub fn config(&self) -> &SourceConfig {
        &self.cfg
    }

    pub fn state(&self) -> AdapterState {
        match self.state.lock() {
            Ok(g) => *g,
            Err(p) => *p.into_inner(),
        }
    }

    fn set_state(&self, s: AdapterState) {
        match self.state.lock() {
            Ok(mut g) => *g = s,
            Err(p) => *p.into_inner() = s,
        }
    }

    pub async fn processed_count(&self) -> usize {
        self.book.lock().await.ledger.len()
    }

    /// Articles waiting for a successful save.
    pub async fn unsaved_count(&self) -> usize {
        self.book.lock().await.unsaved.len()
    }

    /// Fetch, filter and enrich everything new since the last run.
    ///
    /// Provider failure is returned as an error; per-item failures are logged and the item
    /// carries a placeholder or is skipped. Concurrent calls on one adapter queue up.
    pub async fn fetch_new_items(&self) -> Result<Vec<NormalizedArticle>> {
        let mut book = self.book.lock().await;
        let source = self.cfg.source;
        let src = source.as_str();

        self.set_state(AdapterState::FetchingCandidates);
        let candidates = match self.provider.fetch_candidates().await {
            Ok(c) => c,
            Err(e) => {
                self.set_state(AdapterState::Idle);
                return Err(e);
            }
        };
        let fetched = candidates.len();

        self.set_state(AdapterState::FilteringByRecency);
        let now = self.ctx.clock.now();
        let cutoff = now
            .checked_sub_signed(self.cfg.recency_window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut bad_dates = 0usize;
        let recent: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| {
                if let Some(raw) = &c.bad_date {
                    warn!(target: "ingest", %source, link = %c.link, date = %raw, "unparseable date, item skipped");
                    bad_dates += 1;
                    return false;
                }
                c.published.unwrap_or(now) >= cutoff
            })
            .collect();
        let too_old = fetched - bad_dates - recent.len();
        counter!("ingest_bad_date_total", "source" => src).increment(bad_dates as u64);
        counter!("ingest_recency_filtered_total", "source" => src).increment(too_old as u64);

        self.set_state(AdapterState::FilteringByProcessed);
        let mut seen = HashSet::new();
        let fresh: Vec<Candidate> = recent
            .into_iter()
            .filter(|c| {
                !book.ledger.contains(&c.link)
                    && !book.unsaved.iter().any(|u| u.article.link == c.link)
                    && seen.insert(c.link.clone())
            })
            .collect();
        let already = fetched - bad_dates - too_old - fresh.len();
        counter!("ingest_dedup_total", "source" => src).increment(already as u64);
        debug!(target: "ingest", %source, fetched, bad_dates, too_old, already, fresh = fresh.len(), "candidates filtered");

        self.set_state(AdapterState::Enriching);
        let mut out = Vec::new();
        let mut pending = Vec::new();
        let mut since_flush = 0usize;
        let batch: Vec<Candidate> = fresh.into_iter().take(self.cfg.max_articles).collect();
        let last = batch.len().saturating_sub(1);
        for (i, cand) in batch.into_iter().enumerate() {
            let link = cand.link.clone();
            let published = cand.published;
            match self.enrich(cand).await {
                Some(article) => {
                    out.push(article.clone());
                    pending.push(Enriched { article, published });
                    counter!("ingest_enriched_total", "source" => src).increment(1);
                }
                // skipped: nothing to save, but never ask again
                None => book.ledger.mark(&link, published),
            }
            since_flush += 1;
            if since_flush >= self.cfg.flush_every.max(1) {
                self.set_state(AdapterState::PersistingLedger);
                self.persist(&mut book, std::mem::take(&mut pending)).await;
                since_flush = 0;
                self.set_state(AdapterState::Enriching);
            }
            if i < last && !self.cfg.enrich_delay().is_zero() {
                tokio::time::sleep(self.cfg.enrich_delay()).await;
            }
        }

        self.set_state(AdapterState::PersistingLedger);
        self.persist(&mut book, pending).await;
        self.set_state(AdapterState::Idle);

        gauge!("ingest_pipeline_last_run_ts", "source" => src).set(now.timestamp() as f64);
        info!(target: "ingest", %source, fetched, emitted = out.len(), "adapter run finished");
        Ok(out)
    }

    /// Save `batch` together with anything an earlier save left behind, then mark what was
    /// saved and flush the ledger. On a failed save nothing from the batch is marked.
    async fn persist(&self, book: &mut RunBook, mut batch: Vec<Enriched>) {
        if !book.unsaved.is_empty() {
            let mut retry = std::mem::take(&mut book.unsaved);
            retry.append(&mut batch);
            batch = retry;
        }
        if let Some(sink) = self.ctx.sink.as_ref().filter(|_| !batch.is_empty()) {
            let articles: Vec<NormalizedArticle> = batch.iter().map(|e| e.article.clone()).collect();
            if let Err(e) = sink.save_articles(&articles).await {
                warn!(target: "ingest", source = %self.cfg.source, count = batch.len(), error = ?e, "saving articles failed, links left unmarked");
                counter!("ingest_save_errors_total", "source" => self.cfg.source.as_str()).increment(1);
                book.unsaved = batch;
                flush_logged(&mut book.ledger);
                return;
            }
        }
        for e in &batch {
            book.ledger.mark(&e.article.link, e.published);
        }
        flush_logged(&mut book.ledger);
    }

    /// `None` means the item was deliberately dropped (off-topic).
    async fn enrich(&self, cand: Candidate) -> Option<NormalizedArticle> {
        let source = self.cfg.source;
        let text = self.article_text(&cand).await;
        let full = format!("{}. {}", cand.title, text);
        let scorer = &self.ctx.scorer;

        let matched_topics = scorer.handle().topic_matches(&full);

        let on_topic = if self.cfg.classify {
            match scorer.classify_on_topic(&full).await {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(target: "ingest", %source, link = %cand.link, error = %e, "classification failed, keeping item");
                    counter!("ingest_enrich_errors_total", "source" => source.as_str()).increment(1);
                    None
                }
            }
        } else {
            None
        };
        if on_topic == Some(false) && self.cfg.skip_off_topic {
            debug!(target: "ingest", %source, link = %cand.link, "off-topic, skipped");
            return None;
        }

        let summary = if text.chars().count() < MIN_SUMMARY_INPUT_CHARS {
            NOT_ENOUGH_TEXT.to_string()
        } else {
            match scorer.model().summarize(&text, SUMMARY_MAX_TOKENS).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(target: "ingest", %source, link = %cand.link, error = %e, "summarization failed");
                    counter!("ingest_enrich_errors_total", "source" => source.as_str()).increment(1);
                    SUMMARY_FAILED.to_string()
                }
            }
        };

        let relevance_score = scorer.score(&full).await;
        let mut keywords = extract_keywords(&full);
        keywords.truncate(MAX_ARTICLE_KEYWORDS);

        let published = cand.published.unwrap_or_else(|| self.ctx.clock.now());
        let mut paper = cand.paper;
        if let Some(p) = paper.as_mut() {
            let styles = CitationStyle::resolve(&self.cfg.citation_styles);
            p.citations = citations_for(
                &PaperRef {
                    title: &cand.title,
                    authors: &p.authors,
                    published,
                    arxiv_id: &p.arxiv_id,
                },
                &styles,
            );
            if self.cfg.download_pdfs {
                p.pdf_path = self.download(&cand.title, &p.arxiv_id, p.pdf_url.as_deref()).await;
            }
        }

        Some(NormalizedArticle {
            source,
            title: cand.title,
            link: cand.link,
            published,
            summary,
            keywords,
            relevance_score,
            content: (!text.is_empty()).then_some(text),
            on_topic,
            matched_topics,
            paper,
        })
    }

    /// Full page text when configured, else whatever the feed carried.
    async fn article_text(&self, cand: &Candidate) -> String {
        let feed_text = || {
            cand.content
                .clone()
                .or_else(|| cand.summary.clone())
                .unwrap_or_default()
        };
        if !self.cfg.fetch_full_text {
            return feed_text();
        }
        match self.ctx.fetcher.fetch_text(&cand.link).await {
            Ok(t) if !t.trim().is_empty() => t,
            Ok(_) => feed_text(),
            Err(e) => {
                warn!(target: "ingest", source = %self.cfg.source, link = %cand.link, error = ?e, "article fetch failed, using feed text");
                counter!("ingest_enrich_errors_total", "source" => self.cfg.source.as_str()).increment(1);
                feed_text()
            }
        }
    }

    async fn download(&self, title: &str, arxiv_id: &str, url: Option<&str>) -> Option<String> {
        let (Some(client), Some(url)) = (self.ctx.http.as_ref(), url) else {
            return None;
        };
        match download_pdf(client, url, &self.ctx.pdf_dir, &pdf_file_name(title, arxiv_id)).await {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                warn!(target: "ingest", arxiv_id, error = ?e, "pdf download failed");
                counter!("ingest_enrich_errors_total", "source" => Source::Arxiv.as_str()).increment(1);
                None
            }
        }
    }
}

#[async_trait]
impl ArticleSource for SourceAdapter {
    fn source(&self) -> Source {
        self.cfg.source
    }

    async fn fetch_new_items(&self) -> Result<Vec<NormalizedArticle>> {
        SourceAdapter::fetch_new_items(self).await
    }
}

fn flush_logged(ledger: &mut ProcessedLedger) {
    if let Err(e) = ledger.flush() {
        warn!(target: "ingest", source = %ledger.source(), error = ?e, "ledger flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ingest::fetch::FixtureTextFetcher;
    use crate::ingest::providers::arxiv::ArxivProvider;
    use crate::ingest::providers::rss::FeedProvider;
    use crate::model::MockModel;
    use crate::relevance::RelevanceHandle;
    use chrono::{TimeZone, Utc};

    const LONG: &str = "OpenAI released a new GPT model today. The large language model improves \
                        reasoning benchmarks and ships with an API for developers worldwide.";

    fn feed() -> String {
        r#"<rss version="2.0"><channel><title>t</title>
          <item><title>GPT model launch</title><link>https://example.com/a</link>
            <pubDate>Mon, 10 Feb 2025 06:00:00 +0000</pubDate><description>teaser a</description></item>
          <item><title>Robot learning</title><link>https://example.com/b</link>
            <pubDate>Mon, 10 Feb 2025 05:00:00 +0000</pubDate><description>teaser b</description></item>
          <item><title>Old news</title><link>https://example.com/old</link>
            <pubDate>Wed, 05 Feb 2025 05:00:00 +0000</pubDate></item>
          <item><title>GPT model launch (dup)</title><link>https://example.com/a</link>
            <pubDate>Mon, 10 Feb 2025 06:00:00 +0000</pubDate></item>
        </channel></rss>"#
            .to_string()
    }

    fn cfg(source: Source) -> SourceConfig {
        let mut c = SourceConfig::defaults_for(source);
        c.recency_hours = 24;
        c.ledger_retention_hours = 48;
        c.enrich_delay_ms = 0;
        c.classify = false;
        c.skip_off_topic = false;
        c
    }

    fn ctx(dir: &std::path::Path, model: MockModel, fetcher: FixtureTextFetcher) -> AdapterContext {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 2, 10, 8, 0, 0).unwrap()));
        AdapterContext {
            scorer: RelevanceScorer::new(RelevanceHandle::with_defaults().unwrap(), Arc::new(model)),
            fetcher: Arc::new(fetcher),
            clock,
            ledger_dir: dir.join("processed"),
            pdf_dir: dir.join("pdf"),
            http: None,
            sink: None,
        }
    }

    /// `n` items from the last hour.
    fn many(n: usize) -> String {
        let items: String = (0..n)
            .map(|i| {
                format!(
                    "<item><title>Story {i}</title><link>https://example.com/n{i}</link>\
                     <pubDate>Mon, 10 Feb 2025 07:{i:02}:00 +0000</pubDate></item>"
                )
            })
            .collect();
        format!(r#"<rss version="2.0"><channel><title>t</title>{items}</channel></rss>"#)
    }

    /// Notes how many links the ledger file holds each time a page is fetched.
    struct DiskLedgerCounts {
        path: PathBuf,
        seen: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl TextFetcher for DiskLedgerCounts {
        async fn fetch_text(&self, _url: &str) -> Result<String> {
            let n = std::fs::read_to_string(&self.path)
                .ok()
                .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
                .and_then(|v| v["processed_urls"].as_object().map(|m| m.len()))
                .unwrap_or(0);
            self.seen.lock().unwrap().push(n);
            Ok(LONG.to_string())
        }
    }

    fn pages() -> FixtureTextFetcher {
        FixtureTextFetcher::new()
            .with_page("https://example.com/a", LONG)
            .with_page("https://example.com/b", "Too short.")
    }

    #[tokio::test]
    async fn second_run_without_new_upstream_items_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = Arc::new(FeedProvider::from_fixture_str(Source::TheVerge, &feed()));
        let adapter = SourceAdapter::new(cfg(Source::TheVerge), provider, ctx(tmp.path(), MockModel::new(), pages()));

        let first = adapter.fetch_new_items().await.unwrap();
        let links: Vec<_> = first.iter().map(|a| a.link.as_str()).collect();
        assert_eq!(links, vec!["https://example.com/a", "https://example.com/b"]);
        assert_eq!(adapter.state(), AdapterState::Idle);

        assert!(adapter.fetch_new_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ledger_reaches_disk_every_flush_every_items() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = cfg(Source::TheVerge);
        c.flush_every = 2;
        let counts = Arc::new(DiskLedgerCounts {
            path: ProcessedLedger::path_for(&tmp.path().join("processed"), Source::TheVerge),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let mut context = ctx(tmp.path(), MockModel::new(), FixtureTextFetcher::new());
        context.fetcher = counts.clone() as Arc<dyn TextFetcher>;
        let provider = Arc::new(FeedProvider::from_fixture_str(Source::TheVerge, &many(5)));
        let adapter = SourceAdapter::new(c, provider, context.clone());

        assert_eq!(adapter.fetch_new_items().await.unwrap().len(), 5);
        // fetch i sees what the flushes before it wrote
        assert_eq!(*counts.seen.lock().unwrap(), vec![0, 0, 2, 2, 4]);

        let on_disk = ProcessedLedger::load(&context.ledger_dir, Source::TheVerge, None, context.clock);
        assert_eq!(on_disk.len(), 5);
        assert!(!on_disk.is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn enrichments_are_spaced_by_the_configured_delay() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = cfg(Source::TheVerge);
        c.enrich_delay_ms = 1_000;
        let provider = Arc::new(FeedProvider::from_fixture_str(Source::TheVerge, &many(3)));
        let adapter = SourceAdapter::new(c, provider, ctx(tmp.path(), MockModel::new(), pages()));

        let t0 = tokio::time::Instant::now();
        assert_eq!(adapter.fetch_new_items().await.unwrap().len(), 3);
        let elapsed = t0.elapsed();
        assert!(elapsed >= std::time::Duration::from_secs(2), "two gaps for three items: {elapsed:?}");
        assert!(elapsed < std::time::Duration::from_secs(3), "no pause after the last item: {elapsed:?}");
    }

    #[tokio::test]
    async fn ledger_survives_a_new_adapter_instance() {
        let tmp = tempfile::tempdir().unwrap();
        let mk = || {
            SourceAdapter::new(
                cfg(Source::TheVerge),
                Arc::new(FeedProvider::from_fixture_str(Source::TheVerge, &feed())),
                ctx(tmp.path(), MockModel::new(), pages()),
            )
        };
        assert_eq!(mk().fetch_new_items().await.unwrap().len(), 2);
        let restarted = mk();
        assert_eq!(restarted.processed_count().await, 2);
        assert!(restarted.fetch_new_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn placeholders_for_short_text_and_model_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = Arc::new(FeedProvider::from_fixture_str(Source::TheVerge, &feed()));
        let adapter = SourceAdapter::new(
            cfg(Source::TheVerge),
            provider,
            ctx(tmp.path(), MockModel::new().failing(), pages()),
        );
        let items = adapter.fetch_new_items().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].summary, SUMMARY_FAILED);
        assert!(items[0].summary_failed());
        assert_eq!(items[1].summary, NOT_ENOUGH_TEXT);
        // keyword stage still works without the model; model stage falls back to 0.5
        assert!(items[0].relevance_score > 0.0);
    }

    #[tokio::test]
    async fn max_articles_leaves_the_rest_for_the_next_run() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = cfg(Source::TheVerge);
        c.max_articles = 1;
        let provider = Arc::new(FeedProvider::from_fixture_str(Source::TheVerge, &feed()));
        let adapter = SourceAdapter::new(c, provider, ctx(tmp.path(), MockModel::new(), pages()));
        assert_eq!(adapter.fetch_new_items().await.unwrap()[0].link, "https://example.com/a");
        assert_eq!(adapter.fetch_new_items().await.unwrap()[0].link, "https://example.com/b");
        assert!(adapter.fetch_new_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn off_topic_items_are_skipped_and_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = cfg(Source::TechCrunch);
        c.classify = true;
        c.skip_off_topic = true;
        let model = MockModel::new()
            .with_rule("GPT model launch", "Yes")
            .with_rule("Robot learning", "No");
        let provider = Arc::new(FeedProvider::from_fixture_str(Source::TechCrunch, &feed()));
        let adapter = SourceAdapter::new(c, provider, ctx(tmp.path(), model, pages()));

        let items = adapter.fetch_new_items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].on_topic, Some(true));
        assert_eq!(adapter.processed_count().await, 2);
    }

    #[tokio::test]
    async fn fetch_failure_falls_back_to_feed_text() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = Arc::new(FeedProvider::from_fixture_str(Source::TheVerge, &feed()));
        let adapter = SourceAdapter::new(
            cfg(Source::TheVerge),
            provider,
            ctx(tmp.path(), MockModel::new(), FixtureTextFetcher::new()),
        );
        let items = adapter.fetch_new_items().await.unwrap();
        assert_eq!(items[0].content.as_deref(), Some("teaser a"));
    }

    #[tokio::test]
    async fn arxiv_items_carry_citations() {
        let tmp = tempfile::tempdir().unwrap();
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
          <entry>
            <id>http://arxiv.org/abs/2502.00001v1</id>
            <published>2025-02-09T12:00:00Z</published>
            <title>Neural agents</title>
            <summary>Deep learning agents trained with reinforcement learning.</summary>
            <author><name>Ada Lovelace</name></author>
            <link href="http://arxiv.org/abs/2502.00001v1" rel="alternate" type="text/html"/>
          </entry>
        </feed>"#;
        let mut c = cfg(Source::Arxiv);
        c.citation_styles = vec!["all".to_string()];
        let adapter = SourceAdapter::new(
            c,
            Arc::new(ArxivProvider::from_fixture_str(xml)),
            ctx(tmp.path(), MockModel::new(), FixtureTextFetcher::new()),
        );
        let items = adapter.fetch_new_items().await.unwrap();
        let paper = items[0].paper.as_ref().unwrap();
        assert_eq!(paper.citations.len(), 4);
        assert_eq!(
            paper.citations["apa"],
            "Ada Lovelace (2025). Neural agents. arXiv preprint arXiv:2502.00001v1"
        );
    }
}
