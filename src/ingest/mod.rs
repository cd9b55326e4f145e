// src/ingest/mod.rs
//! Source ingestion: providers produce candidates, adapters filter/dedup/enrich them into
//! [`NormalizedArticle`](crate::article::NormalizedArticle)s.

pub mod adapter;
pub mod fetch;
pub mod ledger;
pub mod providers;
pub mod scheduler;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::collections::HashSet;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_candidates_total",
            "Candidates returned by providers."
        );
        describe_counter!(
            "ingest_recency_filtered_total",
            "Candidates dropped for being older than the source window."
        );
        describe_counter!(
            "ingest_dedup_total",
            "Candidates dropped because the link was already processed."
        );
        describe_counter!("ingest_enriched_total", "Articles enriched and emitted.");
        describe_counter!(
            "ingest_bad_date_total",
            "Candidates skipped because their date could not be parsed."
        );
        describe_counter!(
            "ingest_save_errors_total",
            "Failed saves of enriched articles; their links stay unmarked."
        );
        describe_counter!(
            "ingest_enrich_errors_total",
            "Per-item enrichment failures (fetch, summarize, classify)."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors."
        );
        describe_histogram!("ingest_parse_ms", "Provider parse time in milliseconds.");
        describe_counter!("ingest_runs_total", "Scheduled ingest ticks.");
        describe_counter!(
            "ingest_scheduled_items_total",
            "Articles fetched by scheduled ticks."
        );
        describe_gauge!(
            "ingest_scheduler_failed_sources",
            "Sources that failed on the last scheduled tick."
        );
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when an adapter run last finished."
        );
    });
}

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

/// Normalize feed text: decode entities, strip tags, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    out = RE_TAGS.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    out = RE_WS.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Tokens that never count as keywords.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "because", "as", "what", "when", "where", "how",
    "why", "which", "who", "whom", "this", "that", "these", "those", "is", "are", "was", "were",
    "be", "been", "being", "have", "has", "had", "having", "do", "does", "did", "doing", "to",
    "for", "with", "by", "about", "in", "on", "at", "of", "from", "into", "than", "then", "them",
    "they", "their", "there", "will", "would", "could", "should", "also", "more", "most", "such",
    "over", "under", "after", "before", "while", "your", "just", "like", "said", "says",
];

/// Distinct keywords of `text` in first-seen order: alphanumeric runs, lowercased,
/// longer than three characters, minus stopwords.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.chars().count() <= 3 {
            continue;
        }
        let w = raw.to_lowercase();
        if STOPWORDS.contains(&w.as_str()) {
            continue;
        }
        if seen.insert(w.clone()) {
            out.push(w);
        }
    }
    out
}
