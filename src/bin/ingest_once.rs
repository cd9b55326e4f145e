//! One ingest pass over every enabled source, then exit. Handy from cron or by hand:
//! `cargo run --bin ingest-once`.

use ai_research_hub::config::{AiConfig, AppConfig};
use ai_research_hub::relevance::{RelevanceEngine, RelevanceHandle};
use ai_research_hub::{clock::system_clock, init_tracing, Hub};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::load_default()?;
    let ai = AiConfig::load_default();
    let relevance = RelevanceHandle::new(RelevanceEngine::from_toml()?);
    let hub = Hub::from_config(config, &ai, relevance, system_clock()).await?;

    let sources: Vec<_> = hub.config.enabled_sources().map(|c| c.source).collect();
    let (items, failed) = hub.aggregator.collect(&sources).await;
    for src in &sources {
        let n = items.iter().filter(|a| a.source == *src).count();
        info!(source = %src, new_items = n, "source done");
    }
    if !failed.is_empty() {
        warn!(failed = ?failed, "some sources failed");
    }
    info!(total = items.len(), "ingest pass finished");
    Ok(())
}
