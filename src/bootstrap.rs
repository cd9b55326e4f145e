// src/bootstrap.rs
//! Wires configuration into the running pieces: model, scorer, adapters, aggregator, store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::aggregate::Aggregator;
use crate::cache::CacheStore;
use crate::chat::ChatService;
use crate::clock::SharedClock;
use crate::config::{AiConfig, AppConfig};
use crate::ingest::adapter::{AdapterContext, SourceAdapter};
use crate::ingest::fetch::{http_client, HttpTextFetcher};
use crate::ingest::providers::http_provider;
use crate::model::{build_model, DynModel};
use crate::relevance::{RelevanceHandle, RelevanceScorer};
use crate::store::ArticleStore;

pub struct Hub {
    pub config: AppConfig,
    pub clock: SharedClock,
    pub relevance: RelevanceHandle,
    pub model: DynModel,
    pub scorer: RelevanceScorer,
    pub store: ArticleStore,
    pub aggregator: Arc<Aggregator>,
}

impl Hub {
    /// Live wiring: HTTP providers for every enabled source.
    pub async fn from_config(
        config: AppConfig,
        ai: &AiConfig,
        relevance: RelevanceHandle,
        clock: SharedClock,
    ) -> Result<Self> {
        // Safe diagnostics: only provider + enabled + key length
        info!(
            provider = %ai.provider,
            enabled = ai.enabled,
            key_len = ai.api_key.len(),
            "model config loaded"
        );
        let storage = &config.storage;
        let model = build_model(ai, CacheStore::new(storage.cache_dir.join("model"), clock.clone()));
        let scorer = RelevanceScorer::new(relevance.clone(), model.clone());
        let store = ArticleStore::connect(&storage.database_url, clock.clone())
            .await
            .context("opening article store")?;

        let client = http_client(Duration::from_secs(20))?;
        let ctx = AdapterContext {
            scorer: scorer.clone(),
            fetcher: Arc::new(HttpTextFetcher::with_client(client.clone())),
            clock: clock.clone(),
            ledger_dir: storage.ledger_dir.clone(),
            pdf_dir: storage.pdf_dir.clone(),
            http: Some(client.clone()),
            sink: Some(Arc::new(store.clone())),
        };

        let mut aggregator = Aggregator::new(
            CacheStore::new(storage.cache_dir.join("dashboard"), clock.clone()),
            config.dashboard.clone(),
            clock.clone(),
        )
        .with_store(store.clone());
        for sc in config.enabled_sources() {
            match http_provider(sc, client.clone()) {
                Ok(provider) => {
                    let adapter = SourceAdapter::new(sc.clone(), provider, ctx.clone());
                    aggregator = aggregator.with_source(Arc::new(adapter));
                }
                Err(e) => warn!(source = %sc.source, error = ?e, "source not wired"),
            }
        }
        info!(sources = ?aggregator.configured_sources(), "aggregator ready");

        Ok(Self {
            config,
            clock,
            relevance,
            model,
            scorer,
            store,
            aggregator: Arc::new(aggregator),
        })
    }

    pub fn chat(&self) -> ChatService {
        ChatService::new(
            self.store.clone(),
            self.relevance.clone(),
            self.model.clone(),
            self.config.dashboard.recent_hours,
        )
    }

    pub fn relevance_config_path() -> PathBuf {
        std::env::var(crate::relevance::ENV_RELEVANCE_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(crate::relevance::DEFAULT_RELEVANCE_CONFIG_PATH))
    }
}
