//! AI Research Hub: binary entrypoint.
//! Boots the Axum HTTP server with the dashboard, chat and feedback routes, plus the
//! optional background ingest scheduler.

use ai_research_hub::config::{AiConfig, AppConfig};
use ai_research_hub::ingest::scheduler::spawn_scheduler;
use ai_research_hub::metrics::Metrics;
use ai_research_hub::relevance::{start_hot_reload_thread, RelevanceEngine, RelevanceHandle};
use ai_research_hub::{clock::system_clock, init_tracing, router, AppState, Hub};
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::load_default().map_err(shuttle_runtime::Error::Custom)?;
    let ai = AiConfig::load_default();

    // --- relevance engine, hot reload in dev only ---
    let engine = RelevanceEngine::from_toml().map_err(shuttle_runtime::Error::Custom)?;
    let relevance = RelevanceHandle::new(engine);
    start_hot_reload_thread(relevance.clone(), Hub::relevance_config_path());

    let hub = Hub::from_config(config, &ai, relevance, system_clock())
        .await
        .map_err(shuttle_runtime::Error::Custom)?;

    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(error = ?e, "metrics recorder not installed, /metrics disabled");
            None
        }
    };

    if hub.config.scheduler.enabled {
        let sources = hub.config.enabled_sources().map(|c| c.source).collect();
        spawn_scheduler(hub.aggregator.clone(), hub.config.scheduler.clone(), sources);
        info!(interval_secs = hub.config.scheduler.interval_secs, "ingest scheduler started");
    }

    let app = router(AppState::from_hub(&hub), metrics.as_ref());
    Ok(app.into())
}
