// tests/dashboard.rs
//
// Aggregator over real adapters: three sources, one of them broken.

use std::path::Path;
use std::sync::Arc;

use ai_research_hub::aggregate::{dashboard_cache_key, Aggregator};
use ai_research_hub::article::Source;
use ai_research_hub::cache::CacheStore;
use ai_research_hub::clock::{ManualClock, SharedClock};
use ai_research_hub::config::{DashboardConfig, SourceConfig};
use ai_research_hub::ingest::adapter::{AdapterContext, SourceAdapter};
use ai_research_hub::ingest::fetch::FixtureTextFetcher;
use ai_research_hub::ingest::providers::{arxiv::ArxivProvider, rss::FeedProvider};
use ai_research_hub::ingest::types::{Candidate, SourceProvider};
use ai_research_hub::model::MockModel;
use ai_research_hub::relevance::{RelevanceHandle, RelevanceScorer};
use ai_research_hub::store::ArticleStore;
use chrono::{TimeZone, Utc};

const ARXIV_XML: &str = include_str!("fixtures/arxiv_atom.xml");
const TECHCRUNCH_XML: &str = include_str!("fixtures/techcrunch_rss.xml");

struct Unreachable;

#[async_trait::async_trait]
impl SourceProvider for Unreachable {
    async fn fetch_candidates(&self) -> anyhow::Result<Vec<Candidate>> {
        anyhow::bail!("connection refused")
    }
    fn source(&self) -> Source {
        Source::TheVerge
    }
}

fn cfg(source: Source) -> SourceConfig {
    let mut c = SourceConfig::defaults_for(source);
    c.recency_hours = 168;
    c.enrich_delay_ms = 0;
    c.classify = false;
    c.skip_off_topic = false;
    c.fetch_full_text = false;
    c
}

async fn aggregator(dir: &Path, clock: SharedClock) -> Aggregator {
    let model = MockModel::new().with_completion("0.6");
    let store = ArticleStore::connect("sqlite::memory:", clock.clone()).await.unwrap();
    let ctx = AdapterContext {
        scorer: RelevanceScorer::new(RelevanceHandle::with_defaults().unwrap(), Arc::new(model)),
        fetcher: Arc::new(FixtureTextFetcher::new()),
        clock: clock.clone(),
        ledger_dir: dir.join("processed"),
        pdf_dir: dir.join("papers"),
        http: None,
        sink: Some(Arc::new(store.clone())),
    };

    Aggregator::new(
        CacheStore::new(dir.join("dashboard"), clock.clone()),
        DashboardConfig::default(),
        clock,
    )
    .with_store(store)
    .with_source(Arc::new(SourceAdapter::new(
        cfg(Source::Arxiv),
        Arc::new(ArxivProvider::from_fixture_str(ARXIV_XML)),
        ctx.clone(),
    )))
    .with_source(Arc::new(SourceAdapter::new(
        cfg(Source::TechCrunch),
        Arc::new(FeedProvider::from_fixture_str(Source::TechCrunch, TECHCRUNCH_XML)),
        ctx.clone(),
    )))
    .with_source(Arc::new(SourceAdapter::new(
        cfg(Source::TheVerge),
        Arc::new(Unreachable),
        ctx,
    )))
}

fn clock() -> SharedClock {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 2, 10, 8, 0, 0).unwrap(),
    ))
}

#[tokio::test]
async fn one_failing_source_leaves_the_others_intact() {
    let tmp = tempfile::tempdir().unwrap();
    let agg = aggregator(tmp.path(), clock()).await;
    let selected = [Source::Arxiv, Source::TechCrunch, Source::TheVerge];

    let payload = agg.fetch_dashboard_data(&selected).await;
    assert_eq!(payload.failed_sources, vec![Source::TheVerge]);
    assert!(!payload.from_cache);
    assert_eq!(payload.source_stats.sources.get("arxiv"), Some(&2));
    assert_eq!(payload.source_stats.sources.get("techcrunch"), Some(&3), "January item is outside the week");
    assert_eq!(payload.source_stats.sources.get("theverge"), None);
    assert_eq!(payload.source_stats.total_articles, 5);
    assert_eq!(payload.recent_articles.len(), 5);
    assert!(payload
        .recent_articles
        .windows(2)
        .all(|w| w[0].relevance >= w[1].relevance));
    assert!(!payload.top_keywords.is_empty());
}

#[tokio::test]
async fn payload_is_served_from_cache_until_refresh() {
    let tmp = tempfile::tempdir().unwrap();
    let agg = aggregator(tmp.path(), clock()).await;
    let selected = [Source::TechCrunch, Source::Arxiv];

    let first = agg.fetch_dashboard_data(&selected).await;
    assert!(!first.from_cache);
    assert!(tmp
        .path()
        .join("dashboard")
        .read_dir()
        .unwrap()
        .any(|e| e.unwrap().file_name().to_string_lossy().contains("dashboard_data_arxiv-techcrunch")));

    let cached = agg.fetch_dashboard_data(&[Source::Arxiv, Source::TechCrunch]).await;
    assert!(cached.from_cache);
    assert_eq!(cached.recent_articles, first.recent_articles);

    // adapters have nothing new, the stored copies keep the dashboard populated
    let refreshed = agg.refresh_dashboard(&selected).await;
    assert!(!refreshed.from_cache);
    assert_eq!(refreshed.source_stats.total_articles, first.source_stats.total_articles);
    assert_eq!(dashboard_cache_key(&selected).as_str(), "dashboard_data_arxiv-techcrunch");
}

#[tokio::test]
async fn all_sources_failing_is_not_cached() {
    let tmp = tempfile::tempdir().unwrap();
    let agg = aggregator(tmp.path(), clock()).await;

    let payload = agg.fetch_dashboard_data(&[Source::TheVerge]).await;
    assert_eq!(payload.failed_sources, vec![Source::TheVerge]);
    assert!(payload.recent_articles.is_empty());

    let again = agg.fetch_dashboard_data(&[Source::TheVerge]).await;
    assert!(!again.from_cache);
}
