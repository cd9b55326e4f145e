use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::aggregate::{Aggregator, DashboardPayload};
use crate::article::{NormalizedArticle, Source};
use crate::bootstrap::Hub;
use crate::chat::{ChatAnswer, ChatError, ChatService};
use crate::feedback::record_feedback;
use crate::metrics::Metrics;
use crate::relevance::{Relevance, RelevanceScorer};
use crate::store::{ArticleStore, UserPreference};

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub store: ArticleStore,
    pub scorer: RelevanceScorer,
    pub chat: ChatService,
    /// Used when a dashboard request names no sources.
    pub default_sources: Vec<Source>,
}

impl AppState {
    pub fn from_hub(hub: &Hub) -> Self {
        Self {
            aggregator: hub.aggregator.clone(),
            store: hub.store.clone(),
            scorer: hub.scorer.clone(),
            chat: hub.chat(),
            default_sources: hub.config.enabled_sources().map(|c| c.source).collect(),
        }
    }
}

/// JSON error body: `{ "success": false, "message": ... }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    fn internal(e: anyhow::Error) -> Self {
        warn!(error = ?e, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("An error occurred: {e}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "success": false, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let mut app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/dashboard", post(dashboard))
        .route("/api/dashboard/refresh", post(refresh_dashboard))
        .route("/api/articles", get(articles))
        .route("/api/score", post(score))
        .route("/api/feedback", post(feedback))
        .route("/api/preferences", get(preferences))
        .route("/api/chat", post(chat))
        .with_state(state);
    if let Some(m) = metrics {
        app = app.merge(m.router());
    }
    app.layer(CorsLayer::very_permissive())
}

#[derive(Debug, Default, Deserialize)]
struct DashboardReq {
    #[serde(default)]
    sources: Option<Vec<String>>,
}

fn selection(state: &AppState, req: Option<Json<DashboardReq>>) -> Vec<Source> {
    match req.and_then(|Json(r)| r.sources) {
        Some(names) => Source::parse_selection(names),
        None => state.default_sources.clone(),
    }
}

async fn dashboard(State(state): State<AppState>, req: Option<Json<DashboardReq>>) -> Json<DashboardPayload> {
    let selected = selection(&state, req);
    Json(state.aggregator.fetch_dashboard_data(&selected).await)
}

async fn refresh_dashboard(
    State(state): State<AppState>,
    req: Option<Json<DashboardReq>>,
) -> Json<DashboardPayload> {
    let selected = selection(&state, req);
    Json(state.aggregator.refresh_dashboard(&selected).await)
}

#[derive(Debug, Deserialize)]
struct ArticlesQuery {
    #[serde(default = "default_hours")]
    hours: u64,
    /// Comma separated source names.
    #[serde(default)]
    sources: Option<String>,
}

fn default_hours() -> u64 {
    24
}

/// Ten years.
pub const MAX_ARTICLE_HOURS: u64 = 24 * 365 * 10;

async fn articles(
    State(state): State<AppState>,
    Query(q): Query<ArticlesQuery>,
) -> Result<Json<Vec<NormalizedArticle>>, ApiError> {
    if q.hours > MAX_ARTICLE_HOURS {
        return Err(ApiError::bad_request(format!(
            "hours must be at most {MAX_ARTICLE_HOURS}"
        )));
    }
    let sources = q
        .sources
        .as_deref()
        .map(|s| Source::parse_selection(s.split(',')))
        .unwrap_or_default();
    let rows = state
        .store
        .recent_articles(q.hours, &sources)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct ScoreReq {
    text: String,
}

async fn score(State(state): State<AppState>, Json(body): Json<ScoreReq>) -> Json<Relevance> {
    Json(state.scorer.evaluate(&body.text).await)
}

#[derive(Debug, Deserialize)]
struct FeedbackReq {
    #[serde(default)]
    title: String,
    text: String,
    score: f64,
}

#[derive(Debug, Serialize)]
struct FeedbackResp {
    success: bool,
    keywords: Vec<String>,
}

async fn feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackReq>,
) -> Result<Json<FeedbackResp>, ApiError> {
    if !body.score.is_finite() {
        return Err(ApiError::bad_request("score must be a number"));
    }
    let keywords = record_feedback(&state.store, &body.title, &body.text, body.score)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(FeedbackResp {
        success: true,
        keywords,
    }))
}

async fn preferences(State(state): State<AppState>) -> Result<Json<Vec<UserPreference>>, ApiError> {
    state
        .store
        .preferences()
        .await
        .map(Json)
        .map_err(ApiError::internal)
}

#[derive(Debug, Deserialize)]
struct ChatReq {
    #[serde(default)]
    query: String,
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatReq>) -> Result<Json<ChatAnswer>, ApiError> {
    match state.chat.answer(&body.query).await {
        Ok(ans) => Ok(Json(ans)),
        Err(ChatError::EmptyQuery) => Err(ApiError::bad_request("No query provided")),
        Err(ChatError::Store(e)) => Err(ApiError::internal(e)),
    }
}
