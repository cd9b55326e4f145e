// src/relevance.rs
//! Topical relevance scoring.
//!
//! Two stages:
//! 1. keyword stage: weighted term table + lead bonus + known-entity bonus, giving
//!    `keyword_score` in ⟨0..1⟩. Always runs, never touches the network.
//! 2. model stage: only when `keyword_score` clears the admission threshold. The model's
//!    0..1 judgement is blended with the keyword score into the final 0..10 score.
//!
//! The engine (stage 1 + constants) is loaded from TOML and can be hot-reloaded in dev.
//! [`RelevanceScorer`] adds the model stage on top of a [`RelevanceHandle`].
//!
//! There is a second, relative score: [`RelevanceEngine::ranking_score`]. It is only used to
//! order stored articles against a chat query and is not on the 0..10 scale.

use metrics::{counter, describe_counter};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::model::{truncate_chars, DynModel, ModelError};

// --- env defaults & names ---
pub const DEFAULT_RELEVANCE_CONFIG_PATH: &str = "config/relevance.toml";
pub const ENV_RELEVANCE_CONFIG_PATH: &str = "RELEVANCE_CONFIG_PATH";

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "relevance_model_calls_total",
            "Relevance evaluations that reached the model stage."
        );
        describe_counter!(
            "relevance_short_circuit_total",
            "Relevance evaluations settled by the keyword stage alone."
        );
    });
}

// Dev logging gate: RELEVANCE_DEV_LOG=1 AND dev env (debug or SHUTTLE_ENV in {local,development,dev})
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var("RELEVANCE_DEV_LOG").ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    is_dev_env()
}

pub(crate) fn is_dev_env() -> bool {
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

/// Short stable id for a text, so logs can correlate without carrying content.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Minimal, anonymized dev logger for relevance events.
fn dev_log_relevance(event: &str, text: &str, rel: &Relevance) {
    if !dev_logging_enabled() {
        return;
    }
    let id = anon_hash(text);
    // Never log raw text. Only hashed id + short lists.
    info!(
        target: "relevance",
        %id,
        event,
        score = rel.score,
        keyword_score = rel.keyword_score,
        model_score = ?rel.model_score,
        matched = ?truncate_vec(&rel.matched, 5),
        entities = ?truncate_vec(&rel.entities, 5)
    );
}

pub(crate) fn truncate_vec<T: ToString>(v: &[T], max: usize) -> Vec<String> {
    v.iter().take(max).map(|x| x.to_string()).collect()
}

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringCfg {
    /// keyword_score below this never reaches the model
    pub short_circuit_below: f32,
    /// multiplier applied to keyword_score on the short-circuit path
    pub short_circuit_scale: f32,
    pub keyword_weight: f32,
    pub model_weight: f32,
    /// accumulated weight is divided by this before capping at 1.0
    pub normalizer: f32,
    pub lead_chars: usize,
    /// extra fraction of a term's weight when it also occurs in the lead
    pub lead_bonus: f32,
    pub entity_chars: usize,
    pub entity_bonus: f32,
    pub entity_bonus_cap: f32,
    /// model score used when the call fails or the output has no number
    pub model_default: f32,
    pub model_text_chars: usize,
    pub model_max_tokens: u32,
}

impl Default for ScoringCfg {
    fn default() -> Self {
        Self {
            short_circuit_below: 0.2,
            short_circuit_scale: 5.0,
            keyword_weight: 0.4,
            model_weight: 0.6,
            normalizer: 10.0,
            lead_chars: 500,
            lead_bonus: 0.5,
            entity_chars: 2000,
            entity_bonus: 0.1,
            entity_bonus_cap: 0.3,
            model_default: 0.5,
            model_text_chars: 3000,
            model_max_tokens: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntitiesCfg {
    /// Lowercase names; an entity counts when its lowercase text contains one of these.
    pub known: Vec<String>,
}

impl Default for EntitiesCfg {
    fn default() -> Self {
        Self {
            known: ["openai", "google", "microsoft", "anthropic", "meta", "nvidia"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicsCfg {
    /// Cheap on-topic detector terms, matched case-insensitively on word boundaries.
    pub terms: Vec<String>,
}

impl Default for TopicsCfg {
    fn default() -> Self {
        Self {
            terms: [
                "artificial intelligence",
                "machine learning",
                "neural network",
                "deep learning",
                "OpenAI",
                "GPT",
                "LLM",
                "AI",
                "algorithm",
                "chatbot",
                "transformer",
                "language model",
                "generative",
                "autonomous system",
                "computer vision",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

fn default_keywords() -> BTreeMap<String, f32> {
    [
        ("artificial intelligence", 1.0),
        ("machine learning", 0.9),
        ("deep learning", 0.9),
        ("neural network", 0.8),
        ("large language model", 1.0),
        ("llm", 0.9),
        ("generative ai", 1.0),
        ("natural language processing", 0.8),
        ("nlp", 0.7),
        ("computer vision", 0.7),
        ("reinforcement learning", 0.8),
        ("ai ethics", 0.8),
        ("transformer", 0.7),
        ("openai", 0.8),
        ("gpt", 0.8),
        ("chatgpt", 0.8),
        ("gemini", 0.7),
        ("claude", 0.7),
        ("mistral", 0.7),
        ("anthropic", 0.7),
        ("google ai", 0.7),
    ]
    .iter()
    .map(|(k, w)| (k.to_string(), *w))
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelevanceRoot {
    #[serde(default)]
    pub scoring: ScoringCfg,
    /// term → weight in ⟨0..1⟩
    #[serde(default = "default_keywords")]
    pub keywords: BTreeMap<String, f32>,
    #[serde(default)]
    pub entities: EntitiesCfg,
    #[serde(default)]
    pub topics: TopicsCfg,
}

impl Default for RelevanceRoot {
    fn default() -> Self {
        Self {
            scoring: ScoringCfg::default(),
            keywords: default_keywords(),
            entities: EntitiesCfg::default(),
            topics: TopicsCfg::default(),
        }
    }
}

/* ----------------------------
Engine (keyword stage)
---------------------------- */

/// Output of the keyword stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordScore {
    pub score: f32,
    pub matched: Vec<String>,
    pub entities: Vec<String>,
}

/// Result of a full relevance evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Relevance {
    /// Canonical 0..=10 score.
    pub score: f32,
    pub keyword_score: f32,
    /// `None` when the keyword stage short-circuited.
    pub model_score: Option<f32>,
    pub matched: Vec<String>,
    pub entities: Vec<String>,
}

impl Relevance {
    pub fn short_circuited(&self) -> bool {
        self.model_score.is_none()
    }
}

// Runs of capitalized tokens: "OpenAI", "Google DeepMind", "Sam Altman".
static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][\w&.-]*(?:\s+[A-Z][\w&.-]*)*").expect("entity regex")
});

static SCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]*\.?[0-9]+)").expect("score regex"));

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\w+").expect("word regex"));

#[derive(Debug)]
pub struct RelevanceEngine {
    pub cfg: RelevanceRoot,
    keywords: Vec<(String, f32)>,
    topics: Vec<(String, Regex)>,
}

impl RelevanceEngine {
    pub fn new(mut cfg: RelevanceRoot) -> anyhow::Result<Self> {
        let keywords = cfg
            .keywords
            .iter()
            .filter(|(k, _)| !k.trim().is_empty())
            .map(|(k, w)| (k.trim().to_lowercase(), w.clamp(0.0, 1.0)))
            .collect();

        let topics = cfg
            .topics
            .terms
            .iter()
            .map(|t| {
                let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(t.trim())))
                    .map_err(|e| anyhow::anyhow!("topic `{}` regex error: {}", t, e))?;
                Ok((t.trim().to_string(), re))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        cfg.entities.known = cfg
            .entities
            .known
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        if !cfg.scoring.normalizer.is_finite() || cfg.scoring.normalizer <= 0.0 {
            cfg.scoring.normalizer = ScoringCfg::default().normalizer;
        }

        Ok(Self {
            cfg,
            keywords,
            topics,
        })
    }

    /// Load from TOML. Uses RELEVANCE_CONFIG_PATH or defaults to "config/relevance.toml".
    /// A missing file at the default location means built-in defaults.
    pub fn from_toml() -> anyhow::Result<Self> {
        let explicit = std::env::var(ENV_RELEVANCE_CONFIG_PATH).ok().map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RELEVANCE_CONFIG_PATH));

        if explicit.is_none() && !path.exists() {
            info!(target: "relevance", "no relevance config file, using built-in table");
            return Self::new(RelevanceRoot::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read relevance config at {}: {}",
                path.display(),
                e
            )
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let cfg: RelevanceRoot = toml::from_str(toml_str)?;
        Self::new(cfg)
    }

    pub fn scoring(&self) -> &ScoringCfg {
        &self.cfg.scoring
    }

    /// Keyword stage. Returns score 0 with no entities when no term matches.
    pub fn keyword_score(&self, text: &str) -> KeywordScore {
        let sc = &self.cfg.scoring;
        let lower = text.to_lowercase();
        let lead = truncate_chars(&lower, sc.lead_chars);

        let mut total = 0.0f32;
        let mut matched = Vec::new();
        for (term, weight) in &self.keywords {
            if lower.contains(term.as_str()) {
                total += weight;
                if lead.contains(term.as_str()) {
                    total += weight * sc.lead_bonus;
                }
                matched.push(term.clone());
            }
        }

        if matched.is_empty() {
            return KeywordScore::default();
        }

        let entities = self.known_entities(text);
        let base = (total / sc.normalizer).min(1.0);
        let bonus = (entities.len() as f32 * sc.entity_bonus).min(sc.entity_bonus_cap);

        KeywordScore {
            score: (base + bonus).min(1.0),
            matched,
            entities,
        }
    }

    /// Known industry names among the capitalized spans of the text's head.
    pub fn known_entities(&self, text: &str) -> Vec<String> {
        let head = truncate_chars(text, self.cfg.scoring.entity_chars);
        let spans: Vec<String> = ENTITY_RE
            .find_iter(head)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        self.cfg
            .entities
            .known
            .iter()
            .filter(|known| spans.iter().any(|s| s.contains(known.as_str())))
            .cloned()
            .collect()
    }

    /// Topic terms present in `text` (word boundaries, case-insensitive).
    pub fn topic_matches(&self, text: &str) -> Vec<String> {
        self.topics
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Relative ordering score for a text against a free-form query.
    ///
    /// Raw (unnormalized) keyword weight of the text plus one point per query word that
    /// appears in it, and two more when the whole query appears verbatim. Only meaningful
    /// for comparing texts against the same query.
    pub fn ranking_score(&self, query: &str, text: &str) -> f32 {
        let lower = text.to_lowercase();
        let mut score: f32 = self
            .keywords
            .iter()
            .filter(|(term, _)| lower.contains(term.as_str()))
            .map(|(_, w)| *w)
            .sum();

        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return score;
        }
        if lower.contains(&q) {
            score += 2.0;
        }
        let mut seen = Vec::new();
        for w in WORD_RE.find_iter(&q).map(|m| m.as_str()) {
            if w.chars().count() < 3 || seen.contains(&w) {
                continue;
            }
            seen.push(w);
            if lower.contains(w) {
                score += 1.0;
            }
        }
        score
    }
}

/// Combine the stage outputs into the canonical 0..=10 score.
///
/// Rounds half to even.
pub fn combine_scores(sc: &ScoringCfg, keyword_score: f32, model_score: Option<f32>) -> f32 {
    match model_score {
        None => (keyword_score * sc.short_circuit_scale).round_ties_even(),
        Some(m) => {
            let blended = keyword_score * sc.keyword_weight + m * sc.model_weight;
            (blended * 10.0).round_ties_even().clamp(0.0, 10.0)
        }
    }
}

/// First decimal-looking substring of a model reply, clamped to ⟨0..1⟩.
pub fn parse_model_score(reply: &str) -> Option<f32> {
    let caps = SCORE_RE.captures(reply)?;
    let v: f32 = caps.get(1)?.as_str().parse().ok()?;
    if v.is_finite() {
        Some(v.clamp(0.0, 1.0))
    } else {
        None
    }
}

pub fn relevance_prompt(text: &str, max_chars: usize) -> String {
    format!(
        "On a scale of 0.0 to 1.0, rate how relevant this text is to artificial intelligence, \
         machine learning, or related AI technologies. Consider technical depth, specificity \
         to AI, and importance to the field. Return ONLY a single decimal number between 0.0 \
         and 1.0, with no explanation.\n\n{}",
        truncate_chars(text, max_chars)
    )
}

pub fn classification_prompt(text: &str, max_chars: usize) -> String {
    format!(
        "Does the following article meaningfully discuss artificial intelligence, machine \
         learning, or AI-related technology (like LLMs, OpenAI, etc.)? Answer with only 'Yes' \
         or 'No'.\n\n{}",
        truncate_chars(text, max_chars)
    )
}

/* ----------------------------
Thread-safe handle + hot reload
---------------------------- */

/// A threadsafe handle that can hot-reload the underlying engine in dev/local.
/// - Enable by setting RELEVANCE_HOT_RELOAD=1
/// - Dev-gated: active only if cfg!(debug_assertions) OR SHUTTLE_ENV is "local"/"development".
#[derive(Clone)]
pub struct RelevanceHandle {
    inner: Arc<RwLock<RelevanceEngine>>,
}

impl RelevanceHandle {
    pub fn new(engine: RelevanceEngine) -> Self {
        Self {
            inner: Arc::new(RwLock::new(engine)),
        }
    }

    /// Built-in keyword table and constants.
    pub fn with_defaults() -> anyhow::Result<Self> {
        Ok(Self::new(RelevanceEngine::new(RelevanceRoot::default())?))
    }

    pub fn keyword_score(&self, text: &str) -> KeywordScore {
        match self.inner.read() {
            Ok(eng) => eng.keyword_score(text),
            Err(_) => KeywordScore::default(),
        }
    }

    pub fn topic_matches(&self, text: &str) -> Vec<String> {
        match self.inner.read() {
            Ok(eng) => eng.topic_matches(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn ranking_score(&self, query: &str, text: &str) -> f32 {
        match self.inner.read() {
            Ok(eng) => eng.ranking_score(query, text),
            Err(_) => 0.0,
        }
    }

    pub fn scoring(&self) -> ScoringCfg {
        match self.inner.read() {
            Ok(eng) => eng.scoring().clone(),
            Err(_) => ScoringCfg::default(),
        }
    }

    fn replace(&self, engine: RelevanceEngine) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = engine;
        }
    }
}

/// Returns true if we should enable hot reload (dev/local only).
fn hot_reload_enabled() -> bool {
    let want = std::env::var("RELEVANCE_HOT_RELOAD")
        .ok()
        .map(|v| v == "1")
        .unwrap_or(false);
    want && is_dev_env()
}

/// Start a simple polling watcher on `path` to hot-reload into the handle.
/// Polls mtime every 2s. Invalid edits are logged and the previous engine stays.
pub fn start_hot_reload_thread(handle: RelevanceHandle, path: PathBuf) {
    if !hot_reload_enabled() {
        return;
    }

    thread::spawn(move || {
        let poll = Duration::from_secs(2);
        let mut last_mtime: Option<SystemTime> = None;

        loop {
            if let Ok(mtime) = fs::metadata(&path).and_then(|m| m.modified()) {
                let changed = match last_mtime {
                    None => false,
                    Some(prev) => mtime > prev,
                };
                if changed {
                    match fs::read_to_string(&path)
                        .map_err(anyhow::Error::from)
                        .and_then(|c| RelevanceEngine::from_toml_str(&c))
                    {
                        Ok(engine) => {
                            handle.replace(engine);
                            info!(target: "relevance", path = %path.display(), "relevance config reloaded");
                        }
                        Err(e) => {
                            warn!(target: "relevance", error = %e, "relevance reload failed, keeping previous config")
                        }
                    }
                }
                last_mtime = Some(mtime);
            }
            thread::sleep(poll);
        }
    });
}

/* ----------------------------
Scorer (keyword + model stage)
---------------------------- */

#[derive(Clone)]
pub struct RelevanceScorer {
    handle: RelevanceHandle,
    model: DynModel,
}

impl RelevanceScorer {
    pub fn new(handle: RelevanceHandle, model: DynModel) -> Self {
        ensure_metrics_described();
        Self { handle, model }
    }

    pub fn handle(&self) -> &RelevanceHandle {
        &self.handle
    }

    pub fn model(&self) -> &DynModel {
        &self.model
    }

    /// Canonical 0..=10 score. Never fails.
    pub async fn score(&self, text: &str) -> f32 {
        self.evaluate(text).await.score
    }

    pub async fn evaluate(&self, text: &str) -> Relevance {
        let sc = self.handle.scoring();
        let ks = self.handle.keyword_score(text);

        if ks.score < sc.short_circuit_below {
            counter!("relevance_short_circuit_total").increment(1);
            let rel = Relevance {
                score: combine_scores(&sc, ks.score, None),
                keyword_score: ks.score,
                model_score: None,
                matched: ks.matched,
                entities: ks.entities,
            };
            dev_log_relevance("short_circuit", text, &rel);
            return rel;
        }

        counter!("relevance_model_calls_total").increment(1);
        let prompt = relevance_prompt(text, sc.model_text_chars);
        let model_score = match self.model.complete(&prompt, sc.model_max_tokens).await {
            Ok(reply) => parse_model_score(&reply).unwrap_or(sc.model_default),
            Err(e) => {
                warn!(target: "relevance", error = %e, "model relevance failed, using default");
                sc.model_default
            }
        };

        let rel = Relevance {
            score: combine_scores(&sc, ks.score, Some(model_score)),
            keyword_score: ks.score,
            model_score: Some(model_score),
            matched: ks.matched,
            entities: ks.entities,
        };
        dev_log_relevance("model", text, &rel);
        rel
    }

    /// Yes/No on-topic question to the model.
    pub async fn classify_on_topic(&self, text: &str) -> Result<bool, ModelError> {
        let sc = self.handle.scoring();
        let reply = self
            .model
            .complete(&classification_prompt(text, sc.model_text_chars), 3)
            .await?;
        Ok(reply.trim().to_ascii_lowercase().starts_with("yes"))
    }
}
