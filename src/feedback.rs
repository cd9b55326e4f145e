//! User feedback: an article rated by the reader nudges the stored keyword preferences.
//!
//! Preferences are recorded only; the relevance scorer does not read them.

use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;

use crate::store::ArticleStore;

pub const FEEDBACK_KEYWORDS: usize = 5;

/// The `max` most frequent words longer than four characters, lowercased, ties in
/// first-seen order.
pub fn feedback_keywords(text: &str, max: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, raw) in text.split_whitespace().enumerate() {
        let w = raw.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
        if w.chars().count() <= 4 {
            continue;
        }
        counts.entry(w).or_insert((0, pos)).0 += 1;
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(max).map(|(w, _)| w).collect()
}

/// Fold `score` into each of the text's top keywords. Returns the keywords touched.
pub async fn record_feedback(store: &ArticleStore, title: &str, text: &str, score: f64) -> Result<Vec<String>> {
    let keywords = feedback_keywords(text, FEEDBACK_KEYWORDS);
    for kw in &keywords {
        store.update_preference(kw, score).await?;
    }
    debug!(title, score, keywords = ?keywords, "feedback recorded");
    Ok(keywords)
}
