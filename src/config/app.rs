// src/config/app.rs
//! Service configuration from `config/app.toml`.
//!
//! Every section is optional. A missing file yields the built-in defaults, which enable all
//! six sources with their usual feeds and recency windows. `[[sources]]` entries only need
//! `source`; other keys fall back to that source's defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::article::Source;

pub const DEFAULT_APP_CONFIG_PATH: &str = "config/app.toml";
pub const ENV_APP_CONFIG_PATH: &str = "AI_HUB_CONFIG_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub cache_dir: PathBuf,
    pub ledger_dir: PathBuf,
    pub database_url: String,
    pub pdf_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            ledger_dir: PathBuf::from("cache/processed"),
            database_url: "sqlite://articles_database.db".to_string(),
            pdf_dir: PathBuf::from("research_papers"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub expiry_secs: u64,
    pub max_results_per_source: usize,
    pub max_articles: usize,
    pub top_keywords: usize,
    pub trending_topics: usize,
    /// Stored articles younger than this are merged into the payload.
    pub recent_hours: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            expiry_secs: 3600,
            max_results_per_source: 5,
            max_articles: 20,
            top_keywords: 10,
            trending_topics: 7,
            recent_hours: 72,
        }
    }
}

impl DashboardConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 3600,
        }
    }
}

/// Per-source adapter settings after defaults are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub source: Source,
    pub enabled: bool,
    pub feed_url: String,
    pub recency_hours: u64,
    pub max_articles: usize,
    /// Ledger flush cadence during enrichment, in enriched items.
    pub flush_every: usize,
    pub enrich_delay_ms: u64,
    /// Ask the model the Yes/No on-topic question before summarizing.
    pub classify: bool,
    /// Drop items the classifier says are off-topic.
    pub skip_off_topic: bool,
    pub ledger_retention_hours: u64,
    pub fetch_full_text: bool,
    pub categories: Vec<String>,
    pub citation_styles: Vec<String>,
    pub download_pdfs: bool,
}

impl SourceConfig {
    pub fn defaults_for(source: Source) -> Self {
        let (feed_url, recency_hours, max_articles, classify) = match source {
            Source::Arxiv => ("http://export.arxiv.org/api/query", 168, 10, false),
            Source::TechCrunch => (
                "https://techcrunch.com/category/artificial-intelligence/feed/",
                48,
                10,
                true,
            ),
            Source::VentureBeat => ("https://venturebeat.com/category/ai/feed/", 24, 10, true),
            Source::Stanford => ("https://ai.stanford.edu/blog/feed.xml", 24 * 60, 5, false),
            Source::TheVerge => ("https://www.theverge.com/rss/index.xml", 24, 10, true),
            Source::TheHackerNews => (
                "https://thehackernews.com/feeds/posts/default?alt=rss",
                72,
                10,
                false,
            ),
        };
        Self {
            source,
            enabled: true,
            feed_url: feed_url.to_string(),
            recency_hours,
            max_articles,
            flush_every: 5,
            enrich_delay_ms: 1000,
            classify,
            skip_off_topic: classify,
            ledger_retention_hours: recency_hours * 2,
            fetch_full_text: source != Source::Arxiv,
            categories: if source == Source::Arxiv {
                vec!["cs.LG".to_string()]
            } else {
                Vec::new()
            },
            citation_styles: vec!["apa".to_string()],
            download_pdfs: false,
        }
    }

    pub fn recency_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.recency_hours as i64)
    }

    /// Never shorter than the recency window.
    pub fn ledger_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ledger_retention_hours.max(self.recency_hours) as i64)
    }

    pub fn enrich_delay(&self) -> Duration {
        Duration::from_millis(self.enrich_delay_ms)
    }
}

/// On-disk shape of a `[[sources]]` entry. Absent keys keep the source defaults.
#[derive(Debug, Deserialize)]
struct RawSourceConfig {
    source: Source,
    enabled: Option<bool>,
    feed_url: Option<String>,
    recency_hours: Option<u64>,
    max_articles: Option<usize>,
    flush_every: Option<usize>,
    enrich_delay_ms: Option<u64>,
    classify: Option<bool>,
    skip_off_topic: Option<bool>,
    ledger_retention_hours: Option<u64>,
    fetch_full_text: Option<bool>,
    categories: Option<Vec<String>>,
    citation_styles: Option<Vec<String>>,
    download_pdfs: Option<bool>,
}

impl RawSourceConfig {
    fn resolve(self) -> SourceConfig {
        let mut cfg = SourceConfig::defaults_for(self.source);
        if let Some(v) = self.enabled {
            cfg.enabled = v;
        }
        if let Some(v) = self.feed_url {
            cfg.feed_url = v;
        }
        if let Some(v) = self.recency_hours {
            cfg.recency_hours = v;
            // retention follows the window unless set explicitly below
            cfg.ledger_retention_hours = v * 2;
        }
        if let Some(v) = self.max_articles {
            cfg.max_articles = v;
        }
        if let Some(v) = self.flush_every {
            cfg.flush_every = v.max(1);
        }
        if let Some(v) = self.enrich_delay_ms {
            cfg.enrich_delay_ms = v;
        }
        if let Some(v) = self.classify {
            cfg.classify = v;
            cfg.skip_off_topic = v;
        }
        if let Some(v) = self.skip_off_topic {
            cfg.skip_off_topic = v;
        }
        if let Some(v) = self.ledger_retention_hours {
            cfg.ledger_retention_hours = v.max(cfg.recency_hours);
        }
        if let Some(v) = self.fetch_full_text {
            cfg.fetch_full_text = v;
        }
        if let Some(v) = self.categories {
            let v: Vec<String> = v
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            // an empty list would make an empty arXiv query
            if !v.is_empty() {
                cfg.categories = v;
            }
        }
        if let Some(v) = self.citation_styles {
            cfg.citation_styles = v;
        }
        if let Some(v) = self.download_pdfs {
            cfg.download_pdfs = v;
        }
        cfg
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAppConfig {
    storage: StorageConfig,
    dashboard: DashboardConfig,
    scheduler: SchedulerConfig,
    sources: Vec<RawSourceConfig>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub dashboard: DashboardConfig,
    pub scheduler: SchedulerConfig,
    /// One entry per source, in `Source::ALL` order.
    pub sources: Vec<SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            dashboard: DashboardConfig::default(),
            scheduler: SchedulerConfig::default(),
            sources: Source::ALL.iter().map(|s| SourceConfig::defaults_for(*s)).collect(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let raw: RawAppConfig = toml::from_str(s).context("parsing app config toml")?;

        let mut sources: Vec<SourceConfig> =
            Source::ALL.iter().map(|s| SourceConfig::defaults_for(*s)).collect();
        for entry in raw.sources {
            let resolved = entry.resolve();
            if let Some(slot) = sources.iter_mut().find(|c| c.source == resolved.source) {
                *slot = resolved;
            }
        }

        Ok(Self {
            storage: raw.storage,
            dashboard: raw.dashboard,
            scheduler: raw.scheduler,
            sources,
        })
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading app config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// `$AI_HUB_CONFIG_PATH` (must exist), else `config/app.toml` if present, else defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_APP_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                anyhow::bail!("{ENV_APP_CONFIG_PATH} points to non-existent path");
            }
            return Self::load_from(&pb);
        }
        let default = PathBuf::from(DEFAULT_APP_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        Ok(Self::default())
    }

    pub fn source(&self, source: Source) -> Option<&SourceConfig> {
        self.sources.iter().find(|c| c.source == source)
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|c| c.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_all_six_sources() {
        let cfg = AppConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.sources.len(), 6);
        assert_eq!(cfg.dashboard.max_articles, 20);
        assert_eq!(cfg.dashboard.top_keywords, 10);
        assert_eq!(cfg.dashboard.trending_topics, 7);
        let thn = cfg.source(Source::TheHackerNews).unwrap();
        assert_eq!(thn.recency_hours, 72);
        assert_eq!(thn.ledger_retention_hours, 144);
        assert_eq!(cfg.source(Source::Stanford).unwrap().max_articles, 5);
    }

    #[test]
    fn partial_source_entries_keep_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
[dashboard]
expiry_secs = 60

[[sources]]
source = "arxiv"
categories = ["cs.AI", "cs.CL"]
citation_styles = ["all"]

[[sources]]
source = "theverge"
enabled = false
recency_hours = 12
"#,
        )
        .unwrap();

        assert_eq!(cfg.dashboard.expiry_secs, 60);
        assert_eq!(cfg.dashboard.max_results_per_source, 5);

        let arxiv = cfg.source(Source::Arxiv).unwrap();
        assert_eq!(arxiv.categories, vec!["cs.AI", "cs.CL"]);
        assert_eq!(arxiv.citation_styles, vec!["all"]);
        assert_eq!(arxiv.flush_every, 5);

        let verge = cfg.source(Source::TheVerge).unwrap();
        assert!(!verge.enabled);
        assert_eq!(verge.recency_hours, 12);
        assert_eq!(verge.ledger_retention_hours, 24);
        assert_eq!(cfg.enabled_sources().count(), 5);
    }

    #[test]
    fn empty_arxiv_categories_keep_the_default() {
        let cfg = AppConfig::from_toml_str(
            r#"
[[sources]]
source = "arxiv"
categories = ["", "  "]
"#,
        )
        .unwrap();
        assert_eq!(cfg.source(Source::Arxiv).unwrap().categories, vec!["cs.LG"]);
    }

    #[test]
    fn ledger_retention_never_undercuts_recency() {
        let mut c = SourceConfig::defaults_for(Source::TechCrunch);
        c.ledger_retention_hours = 1;
        assert_eq!(c.ledger_retention(), c.recency_window());
    }

    #[test]
    fn unknown_source_name_is_rejected() {
        let err = AppConfig::from_toml_str(
            r#"
[[sources]]
source = "slashdot"
"#,
        );
        assert!(err.is_err());
    }
}
