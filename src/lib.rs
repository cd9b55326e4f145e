// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod aggregate;
pub mod api;
pub mod article;
pub mod bootstrap;
pub mod cache;
pub mod chat;
pub mod citation;
pub mod clock;
pub mod config;
pub mod feedback;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod relevance;
pub mod store;

// ---- Re-exports for stable public API ----
// `ai_research_hub::api::router` and `ai_research_hub::router` both work.
pub use crate::api::{router, AppState};
pub use crate::article::{NormalizedArticle, Source};
pub use crate::bootstrap::Hub;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` wins over the default filter;
/// `LOG_FORMAT=json` switches to JSON lines. Safe to call twice.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ai_research_hub=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}
