//! Question answering over stored articles. Reads the store only, never the adapters.

use serde::Serialize;
use tracing::{debug, warn};

use crate::article::NormalizedArticle;
use crate::model::{truncate_chars, DynModel};
use crate::relevance::RelevanceHandle;
use crate::store::ArticleStore;

pub const MAX_CHAT_SOURCES: usize = 10;
const MIN_MATCHES: usize = 3;
const SOURCE_CONTENT_CHARS: usize = 1000;
const ANSWER_MAX_TOKENS: u32 = 500;
pub const CHAT_FALLBACK: &str =
    "Sorry, I could not generate an answer right now. Please try again later.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSource {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatAnswer {
    pub success: bool,
    pub response: String,
    pub sources_count: usize,
    pub sources: Vec<ChatSource>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("no query provided")]
    EmptyQuery,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct ChatService {
    store: ArticleStore,
    relevance: RelevanceHandle,
    model: DynModel,
    recent_hours: u64,
}

impl ChatService {
    pub fn new(store: ArticleStore, relevance: RelevanceHandle, model: DynModel, recent_hours: u64) -> Self {
        Self {
            store,
            relevance,
            model,
            recent_hours,
        }
    }

    pub async fn answer(&self, query: &str) -> Result<ChatAnswer, ChatError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ChatError::EmptyQuery);
        }
        let recent = self.store.recent_articles(self.recent_hours, &[]).await?;
        let picked = select_sources(&self.relevance, query, recent);
        debug!(query_len = query.len(), sources = picked.len(), "chat sources selected");

        let prompt = chat_prompt(query, &picked);
        let sources: Vec<ChatSource> = picked
            .iter()
            .map(|a| ChatSource {
                title: a.title.clone(),
                url: a.link.clone(),
            })
            .collect();

        match self.model.complete(&prompt, ANSWER_MAX_TOKENS).await {
            Ok(response) => Ok(ChatAnswer {
                success: true,
                response,
                sources_count: sources.len(),
                sources,
            }),
            Err(e) => {
                warn!(error = %e, "chat model call failed");
                Ok(ChatAnswer {
                    success: false,
                    response: CHAT_FALLBACK.to_string(),
                    sources_count: sources.len(),
                    sources,
                })
            }
        }
    }
}

/// Articles mentioning the query (title or summary) first; when fewer than three do,
/// the rest of the recent set is considered too. Ranked by the relative ranking score,
/// ties keep store order, cut to [`MAX_CHAT_SOURCES`].
pub fn select_sources(
    relevance: &RelevanceHandle,
    query: &str,
    recent: Vec<NormalizedArticle>,
) -> Vec<NormalizedArticle> {
    let q = query.to_lowercase();
    let (mut pool, rest): (Vec<_>, Vec<_>) = recent.into_iter().partition(|a| {
        a.title.to_lowercase().contains(&q) || a.summary.to_lowercase().contains(&q)
    });
    if pool.len() < MIN_MATCHES {
        pool.extend(rest);
    }

    let mut scored: Vec<(f32, NormalizedArticle)> = pool
        .into_iter()
        .map(|a| {
            let text = format!("{} {} {}", a.title, a.summary, a.content.as_deref().unwrap_or_default());
            (relevance.ranking_score(query, &text), a)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
        .into_iter()
        .take(MAX_CHAT_SOURCES)
        .map(|(_, a)| a)
        .collect()
}

pub fn chat_prompt(query: &str, sources: &[NormalizedArticle]) -> String {
    let mut formatted = String::new();
    for (i, a) in sources.iter().enumerate() {
        let content = a.content.as_deref().unwrap_or(&a.summary);
        let cut = truncate_chars(content, SOURCE_CONTENT_CHARS);
        let ellipsis = if cut.len() < content.len() { "..." } else { "" };
        formatted.push_str(&format!(
            "SOURCE {}:\nTitle: {}\nDate: {}\nURL: {}\nContent: {}{}\n\n",
            i + 1,
            a.title,
            a.published.format("%Y-%m-%d"),
            a.link,
            cut,
            ellipsis
        ));
    }
    format!(
        "You are a helpful AI research assistant. You have access to the following research \
         sources. When answering questions, use these sources to provide accurate, cited \
         information. If you can't find it in the sources, say that you don't know. Always \
         cite your sources as [SOURCE X] and use quotation marks when quoting directly.\n\n\
         SOURCES:\n{formatted}QUESTION: {query}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::Source;
    use crate::clock::system_clock;
    use crate::model::MockModel;
    use chrono::Utc;
    use std::sync::Arc;

    fn art(n: usize, title: &str, summary: &str) -> NormalizedArticle {
        NormalizedArticle {
            source: Source::TheVerge,
            title: title.to_string(),
            link: format!("https://example.com/{n}"),
            published: Utc::now(),
            summary: summary.to_string(),
            keywords: vec![],
            relevance_score: 5.0,
            content: None,
            on_topic: None,
            matched_topics: vec![],
            paper: None,
        }
    }

    #[test]
    fn matching_articles_rank_first_and_pad_when_scarce() {
        let h = RelevanceHandle::with_defaults().unwrap();
        let recent = vec![
            art(1, "Cooking tips", "Pasta"),
            art(2, "Robotics roundup", "Robots learn to walk"),
            art(3, "Robotics and deep learning", "Robots trained with deep learning"),
        ];
        let picked = select_sources(&h, "robots", recent);
        assert_eq!(picked.len(), 3, "two matches pad with the rest");
        assert_eq!(picked[2].title, "Cooking tips");
        assert_eq!(picked[0].title, "Robotics and deep learning");
    }

    #[test]
    fn prompt_numbers_sources_and_truncates_content() {
        let mut a = art(1, "Long one", "s");
        a.content = Some("x".repeat(1500));
        let p = chat_prompt("what?", &[a, art(2, "Short", "tiny")]);
        assert!(p.contains("SOURCE 1:\nTitle: Long one"));
        assert!(p.contains("SOURCE 2:\nTitle: Short"));
        assert!(p.contains(&format!("Content: {}...\n", "x".repeat(1000))));
        assert!(p.ends_with("QUESTION: what?"));
    }

    #[tokio::test]
    async fn model_failure_yields_fallback() {
        let store = ArticleStore::connect("sqlite::memory:", system_clock()).await.unwrap();
        store.save_batch(&[art(1, "Agents", "Agents plan")]).await.unwrap();
        let chat = ChatService::new(
            store,
            RelevanceHandle::with_defaults().unwrap(),
            Arc::new(MockModel::new().failing()),
            24,
        );
        let ans = chat.answer("agents").await.unwrap();
        assert!(!ans.success);
        assert_eq!(ans.response, CHAT_FALLBACK);
        assert_eq!(ans.sources_count, 1);
        assert!(matches!(chat.answer("  ").await, Err(ChatError::EmptyQuery)));
    }
}
