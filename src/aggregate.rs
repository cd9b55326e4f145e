//! Fan-out over the selected sources, merge, rank and cache the dashboard payload.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::article::{NormalizedArticle, Source};
use crate::cache::{CacheKey, CacheStore};
use crate::clock::SharedClock;
use crate::config::DashboardConfig;
use crate::ingest::extract_keywords;
use crate::ingest::types::ArticleSource;
use crate::store::ArticleStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardArticle {
    pub title: String,
    pub summary: String,
    pub source: Source,
    pub url: String,
    pub date: DateTime<Utc>,
    pub relevance: f32,
    pub keywords: Vec<String>,
}

impl From<&NormalizedArticle> for DashboardArticle {
    fn from(a: &NormalizedArticle) -> Self {
        Self {
            title: a.title.clone(),
            summary: a.summary.clone(),
            source: a.source,
            url: a.link.clone(),
            date: a.published,
            relevance: a.relevance_score,
            keywords: a.keywords.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordCount {
    pub term: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendingTopic {
    pub term: String,
    pub count: usize,
    pub trend: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    pub sources: BTreeMap<String, usize>,
    pub total_articles: usize,
}

/// Wire shape the dashboard front-end reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardPayload {
    pub recent_articles: Vec<DashboardArticle>,
    pub top_keywords: Vec<KeywordCount>,
    pub trending_topics: Vec<TrendingTopic>,
    pub source_stats: SourceStats,
    #[serde(rename = "last_updated")]
    pub last_updated: String,
    pub selected_sources: Vec<Source>,
    #[serde(default)]
    pub failed_sources: Vec<Source>,
    #[serde(default)]
    pub from_cache: bool,
}

impl DashboardPayload {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            recent_articles: Vec::new(),
            top_keywords: Vec::new(),
            trending_topics: Vec::new(),
            source_stats: SourceStats::default(),
            last_updated: format_updated(now),
            selected_sources: Vec::new(),
            failed_sources: Vec::new(),
            from_cache: false,
        }
    }

    /// Every selected source failed; the UI shows an error instead of an empty board.
    pub fn all_failed(&self) -> bool {
        !self.selected_sources.is_empty() && self.failed_sources.len() == self.selected_sources.len()
    }
}

fn format_updated(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `dashboard_data_{a-b-c}` over the sorted selection.
pub fn dashboard_cache_key(selected: &[Source]) -> CacheKey {
    let mut names: Vec<&str> = selected.iter().map(|s| s.as_str()).collect();
    names.sort_unstable();
    CacheKey::logical(format!("dashboard_data_{}", names.join("-")))
}

/// Term frequencies, descending; equal counts keep first-seen order.
pub fn rank_keywords<'a, I>(texts: I) -> Vec<KeywordCount>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<KeywordCount> = Vec::new();
    for text in texts {
        for kw in extract_keywords(text) {
            match index.get(&kw) {
                Some(&i) => counts[i].count += 1,
                None => {
                    index.insert(kw.clone(), counts.len());
                    counts.push(KeywordCount { term: kw, count: 1 });
                }
            }
        }
    }
    // stable: ties stay in insertion order
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}

pub struct Aggregator {
    sources: BTreeMap<Source, Arc<dyn ArticleSource>>,
    cache: CacheStore,
    cfg: DashboardConfig,
    clock: SharedClock,
    store: Option<ArticleStore>,
}

impl Aggregator {
    pub fn new(cache: CacheStore, cfg: DashboardConfig, clock: SharedClock) -> Self {
        Self {
            sources: BTreeMap::new(),
            cache,
            cfg,
            clock,
            store: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn ArticleSource>) -> Self {
        self.sources.insert(source.source(), source);
        self
    }

    /// Recent stored items are merged into the payload. Adapters save their own items.
    pub fn with_store(mut self, store: ArticleStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn configured_sources(&self) -> Vec<Source> {
        self.sources.keys().copied().collect()
    }

    /// Cached payload for this selection, or a fresh one (cached unless every source failed).
    pub async fn fetch_dashboard_data(&self, selected: &[Source]) -> DashboardPayload {
        let selected = normalize_selection(selected);
        if selected.is_empty() {
            return DashboardPayload::empty(self.clock.now());
        }
        let key = dashboard_cache_key(&selected);
        if let Some(mut hit) = self.cache.get::<DashboardPayload>(&key) {
            hit.from_cache = true;
            return hit;
        }
        self.build_and_cache(&key, selected).await
    }

    /// Drop the cached payload for this selection and rebuild it.
    pub async fn refresh_dashboard(&self, selected: &[Source]) -> DashboardPayload {
        let selected = normalize_selection(selected);
        if selected.is_empty() {
            return DashboardPayload::empty(self.clock.now());
        }
        let key = dashboard_cache_key(&selected);
        self.cache.invalidate(&key);
        self.build_and_cache(&key, selected).await
    }

    /// Run every selected adapter once, in order. One source failing only empties its part.
    /// Returns the new items and the sources that failed.
    pub async fn collect(&self, selected: &[Source]) -> (Vec<NormalizedArticle>, Vec<Source>) {
        let mut items = Vec::new();
        let mut failed = Vec::new();
        for src in selected {
            let Some(adapter) = self.sources.get(src) else {
                warn!(source = %src, "no adapter configured for source");
                failed.push(*src);
                continue;
            };
            match adapter.fetch_new_items().await {
                Ok(mut batch) => {
                    info!(source = %src, count = batch.len(), "source fetched");
                    items.append(&mut batch);
                }
                Err(e) => {
                    warn!(source = %src, error = ?e, "source failed, continuing without it");
                    failed.push(*src);
                }
            }
        }
        (items, failed)
    }

    async fn build_and_cache(&self, key: &CacheKey, selected: Vec<Source>) -> DashboardPayload {
        let (fresh, failed) = self.collect(&selected).await;
        let merged = self.merge_with_stored(fresh, &selected).await;
        let payload = self.build_payload(merged, selected, failed);
        if payload.all_failed() {
            warn!("every selected source failed, payload not cached");
        } else {
            self.cache.put(key, &payload, self.cfg.expiry());
        }
        payload
    }

    /// Fresh items win over stored copies of the same (source, link).
    async fn merge_with_stored(&self, fresh: Vec<NormalizedArticle>, selected: &[Source]) -> Vec<NormalizedArticle> {
        let Some(store) = &self.store else {
            return fresh;
        };
        let stored = match store.recent_articles(self.cfg.recent_hours, selected).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = ?e, "reading stored articles failed");
                return fresh;
            }
        };
        let mut merged = fresh;
        for a in stored {
            if !merged.iter().any(|m| m.source == a.source && m.link == a.link) {
                merged.push(a);
            }
        }
        merged
    }

    fn build_payload(
        &self,
        items: Vec<NormalizedArticle>,
        selected: Vec<Source>,
        failed: Vec<Source>,
    ) -> DashboardPayload {
        let mut per_source: BTreeMap<Source, Vec<NormalizedArticle>> = BTreeMap::new();
        for a in items {
            per_source.entry(a.source).or_default().push(a);
        }

        let mut kept: Vec<NormalizedArticle> = Vec::new();
        let mut stats = SourceStats::default();
        for (src, mut list) in per_source {
            list.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
            list.truncate(self.cfg.max_results_per_source);
            stats.sources.insert(src.as_str().to_string(), list.len());
            stats.total_articles += list.len();
            kept.extend(list);
        }

        let texts: Vec<String> = kept.iter().map(|a| a.headline_text()).collect();
        let ranked = rank_keywords(texts.iter().map(String::as_str));
        let top_keywords: Vec<KeywordCount> = ranked.iter().take(self.cfg.top_keywords).cloned().collect();
        let trending_topics = ranked
            .iter()
            .take(self.cfg.trending_topics)
            .map(|k| TrendingTopic {
                term: k.term.clone(),
                count: k.count,
                trend: k.count,
            })
            .collect();

        kept.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        kept.truncate(self.cfg.max_articles);

        DashboardPayload {
            recent_articles: kept.iter().map(DashboardArticle::from).collect(),
            top_keywords,
            trending_topics,
            source_stats: stats,
            last_updated: format_updated(self.clock.now()),
            selected_sources: selected,
            failed_sources: failed,
            from_cache: false,
        }
    }
}

fn normalize_selection(selected: &[Source]) -> Vec<Source> {
    let mut v = selected.to_vec();
    v.sort();
    v.dedup();
    v
}
