//! Language-model boundary: provider abstraction + read-through cache + daily limit.
//!
//! Callers only see [`LanguageModel`] (`summarize`, `complete`). Every call can fail with a
//! [`ModelError`]; callers own the fallback (placeholder summary, neutral score, ...).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheStore};
use crate::clock::SharedClock;
use crate::config::AiConfig;

/// Article text is cut to this many characters before it goes into a prompt.
pub const MAX_PROMPT_TEXT_CHARS: usize = 3000;
pub const SUMMARY_MAX_TOKENS: u32 = 300;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("language model is disabled")]
    Disabled,
    #[error("missing api key")]
    MissingApiKey,
    #[error("daily call limit of {0} reached")]
    DailyLimit(u32),
    #[error("http error: {0}")]
    Http(String),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("empty response")]
    EmptyResponse,
}

pub type ModelFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ModelError>> + Send + 'a>>;

/// What the app asks of a model.
pub trait LanguageModel: Send + Sync {
    /// Short paragraph summary of `text` (cut to [`MAX_PROMPT_TEXT_CHARS`]).
    fn summarize<'a>(&'a self, text: &'a str, max_tokens: u32) -> ModelFuture<'a>;
    /// Raw completion for classify/score prompts. Deterministic settings.
    fn complete<'a>(&'a self, prompt: &'a str, max_tokens: u32) -> ModelFuture<'a>;
    fn provider_name(&self) -> &'static str;
}

pub type DynModel = Arc<dyn LanguageModel>;

/// One upstream chat call. Serialized into the cache fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub kind: RequestKind,
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Summarize,
    Complete,
}

impl RequestKind {
    fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Summarize => "summarize",
            RequestKind::Complete => "complete",
        }
    }
}

impl ModelRequest {
    pub fn summarize(text: &str, max_tokens: u32) -> Self {
        let body = truncate_chars(text, MAX_PROMPT_TEXT_CHARS);
        Self {
            kind: RequestKind::Summarize,
            system: Some(
                "You summarize AI research papers and technology news for a research dashboard."
                    .to_string(),
            ),
            prompt: format!(
                "Summarize the following article in a short paragraph. Focus on the key \
                 contributions and the most important information:\n\n{body}"
            ),
            max_tokens,
            temperature: 0.3,
        }
    }

    pub fn complete(prompt: &str, max_tokens: u32) -> Self {
        Self {
            kind: RequestKind::Complete,
            system: None,
            prompt: prompt.to_string(),
            max_tokens,
            temperature: 0.0,
        }
    }
}

/// First `max` chars of `s`, on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ------------------------------------------------------------
// Providers
// ------------------------------------------------------------

/// Low-level provider: performs the real remote call. Separated so the same caching
/// wrapper serves production and tests.
pub trait Provider: Send + Sync + 'static {
    fn call<'a>(&'a self, req: &'a ModelRequest) -> ModelFuture<'a>;
    fn name(&self) -> &'static str;
}

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI Chat Completions.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("ai-research-hub/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            url: OPENAI_CHAT_URL.to_string(),
        })
    }

    /// Point at a compatible endpoint (proxy, local gateway).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl Provider for OpenAiProvider {
    fn call<'a>(&'a self, req: &'a ModelRequest) -> ModelFuture<'a> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(ModelError::MissingApiKey);
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: Option<String>,
            }

            let mut messages = Vec::with_capacity(2);
            if let Some(sys) = req.system.as_deref() {
                messages.push(Msg {
                    role: "system",
                    content: sys,
                });
            }
            messages.push(Msg {
                role: "user",
                content: &req.prompt,
            });

            let body = Req {
                model: &self.model,
                messages,
                temperature: req.temperature,
                max_tokens: req.max_tokens,
            };

            let resp = self
                .http
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| ModelError::Http(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(ModelError::Status(status.as_u16()));
            }
            let parsed: Resp = resp
                .json()
                .await
                .map_err(|e| ModelError::Http(e.to_string()))?;
            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();
            let cleaned = sanitize_output(&content);
            if cleaned.is_empty() {
                Err(ModelError::EmptyResponse)
            } else {
                Ok(cleaned)
            }
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Always fails with [`ModelError::Disabled`].
pub struct DisabledModel;

impl LanguageModel for DisabledModel {
    fn summarize<'a>(&'a self, _text: &'a str, _max_tokens: u32) -> ModelFuture<'a> {
        Box::pin(async { Err(ModelError::Disabled) })
    }
    fn complete<'a>(&'a self, _prompt: &'a str, _max_tokens: u32) -> ModelFuture<'a> {
        Box::pin(async { Err(ModelError::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic model for tests and offline runs.
///
/// Replies are chosen by the first rule whose needle occurs in the prompt; otherwise
/// summaries echo the start of the text and completions return `default_completion`.
/// Every call (not cache hits, when wrapped) bumps the shared counter.
#[derive(Clone)]
pub struct MockModel {
    rules: Vec<(String, String)>,
    default_completion: String,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_completion: "0.5".to_string(),
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_completion(mut self, reply: impl Into<String>) -> Self {
        self.default_completion = reply.into();
        self
    }

    pub fn with_rule(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    /// Every call fails with an HTTP error.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    fn respond(&self, req: &ModelRequest) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ModelError::Http("mock failure".to_string()));
        }
        if let Some((_, reply)) = self.rules.iter().find(|(n, _)| req.prompt.contains(n.as_str())) {
            return Ok(reply.clone());
        }
        match req.kind {
            RequestKind::Summarize => {
                let body = req.prompt.split("\n\n").nth(1).unwrap_or_default();
                Ok(format!("Summary: {}", truncate_chars(body, 80)))
            }
            RequestKind::Complete => Ok(self.default_completion.clone()),
        }
    }
}

impl Provider for MockModel {
    fn call<'a>(&'a self, req: &'a ModelRequest) -> ModelFuture<'a> {
        let out = self.respond(req);
        Box::pin(async move { out })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

impl LanguageModel for MockModel {
    fn summarize<'a>(&'a self, text: &'a str, max_tokens: u32) -> ModelFuture<'a> {
        let out = self.respond(&ModelRequest::summarize(text, max_tokens));
        Box::pin(async move { out })
    }
    fn complete<'a>(&'a self, prompt: &'a str, max_tokens: u32) -> ModelFuture<'a> {
        let out = self.respond(&ModelRequest::complete(prompt, max_tokens));
        Box::pin(async move { out })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Caching wrapper (file cache + daily limit)
// ------------------------------------------------------------

pub struct CachedModel<P: Provider> {
    inner: P,
    cache: CacheStore,
    expiry: Duration,
    daily_limit: u32,
    counter: Mutex<DailyCounter>,
}

impl<P: Provider> CachedModel<P> {
    /// `cache` should be a store dedicated to model responses; the daily counter lives
    /// next to the entries.
    pub fn new(inner: P, cache: CacheStore, expiry: Duration, daily_limit: u32) -> Self {
        let today = day_key(cache.clock());
        let counter = load_daily_counter(&cache)
            .filter(|c| c.date == today)
            .unwrap_or(DailyCounter {
                date: today,
                count: 0,
            });
        Self {
            inner,
            cache,
            expiry,
            daily_limit,
            counter: Mutex::new(counter),
        }
    }

    pub fn calls_today(&self) -> u32 {
        lock_counter(&self.counter).count
    }

    /// Undo a reservation, unless the day rolled over in the meantime.
    fn release_slot(&self, day: &str) {
        let mut g = lock_counter(&self.counter);
        if g.date == day {
            g.count = g.count.saturating_sub(1);
        }
    }

    async fn call_impl(&self, req: ModelRequest) -> Result<String, ModelError> {
        let key = CacheKey::for_call(req.kind.as_str(), &(self.inner.name(), &req));

        // 1) Cache lookup. Hits never count against the limit.
        if let Some(hit) = self.cache.get::<String>(&key) {
            return Ok(hit);
        }

        // 2) Daily limit (real calls only). The slot is taken before the call so concurrent
        //    callers cannot overshoot.
        let reserved_day = {
            let mut g = lock_counter(&self.counter);
            let today = day_key(self.cache.clock());
            if g.date != today {
                g.date = today;
                g.count = 0;
            }
            if g.count >= self.daily_limit {
                warn!(limit = self.daily_limit, "model daily limit reached");
                return Err(ModelError::DailyLimit(self.daily_limit));
            }
            g.count += 1;
            g.date.clone()
        };

        // 3) Real call. Failures hand the slot back.
        let cleaned = match self.inner.call(&req).await {
            Ok(fresh) => sanitize_output(&fresh),
            Err(e) => {
                self.release_slot(&reserved_day);
                return Err(e);
            }
        };
        if cleaned.is_empty() {
            self.release_slot(&reserved_day);
            return Err(ModelError::EmptyResponse);
        }
        self.cache.put(&key, &cleaned, self.expiry);

        let snapshot = lock_counter(&self.counter).clone();
        save_daily_counter(&self.cache, &snapshot);
        debug!(provider = self.inner.name(), kind = req.kind.as_str(), "model call");
        Ok(cleaned)
    }
}

impl<P: Provider> LanguageModel for CachedModel<P> {
    fn summarize<'a>(&'a self, text: &'a str, max_tokens: u32) -> ModelFuture<'a> {
        Box::pin(self.call_impl(ModelRequest::summarize(text, max_tokens)))
    }
    fn complete<'a>(&'a self, prompt: &'a str, max_tokens: u32) -> ModelFuture<'a> {
        Box::pin(self.call_impl(ModelRequest::complete(prompt, max_tokens)))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

const DAILY_COUNTER_KEY: &str = "daily_count";

fn day_key(clock: &SharedClock) -> String {
    clock.now().date_naive().to_string()
}

fn lock_counter(m: &Mutex<DailyCounter>) -> std::sync::MutexGuard<'_, DailyCounter> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

fn load_daily_counter(cache: &CacheStore) -> Option<DailyCounter> {
    cache.get(&CacheKey::logical(DAILY_COUNTER_KEY))
}

fn save_daily_counter(cache: &CacheStore, dc: &DailyCounter) {
    // Two days keeps yesterday's file readable across a UTC rollover.
    cache.put(
        &CacheKey::logical(DAILY_COUNTER_KEY),
        dc,
        Duration::from_secs(2 * 86_400),
    );
}

/// Single line, no control chars, collapsed whitespace.
pub fn sanitize_output(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_space = false;
    for ch in input.chars() {
        let c = if ch.is_whitespace() || ch.is_control() {
            ' '
        } else {
            ch
        };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out.trim_end().to_string()
}

// ------------------------------------------------------------
// Factory
// ------------------------------------------------------------

/// Build the model the app runs with.
///
/// * `AI_TEST_MODE=mock` → deterministic mock behind the cache.
/// * `enabled == false` or an unknown provider → [`DisabledModel`].
/// * `openai` → OpenAI behind the cache + daily limit.
pub fn build_model(cfg: &AiConfig, cache: CacheStore) -> DynModel {
    let expiry = Duration::from_secs(cfg.cache_expiry_secs);

    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(CachedModel::new(
            MockModel::new(),
            cache,
            expiry,
            cfg.daily_limit,
        ));
    }

    if !cfg.enabled {
        return Arc::new(DisabledModel);
    }

    match cfg.provider.as_str() {
        "openai" => {
            match OpenAiProvider::new(&cfg.api_key, &cfg.model, Duration::from_secs(cfg.timeout_secs))
            {
                Ok(p) => Arc::new(CachedModel::new(p, cache, expiry, cfg.daily_limit)),
                Err(e) => {
                    warn!(error = %e, "http client build failed, model disabled");
                    Arc::new(DisabledModel)
                }
            }
        }
        other => {
            warn!(provider = other, "unsupported model provider, model disabled");
            Arc::new(DisabledModel)
        }
    }
}
