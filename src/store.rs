//! Durable record of articles and feedback-derived keyword preferences (SQLite via sqlx).

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, error, info};

use crate::article::{NormalizedArticle, Source};
use crate::clock::SharedClock;
use crate::ingest::types::ArticleSink;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        title TEXT NOT NULL,
        link TEXT NOT NULL,
        published TEXT NOT NULL,
        summary TEXT NOT NULL,
        keywords TEXT NOT NULL DEFAULT '[]',
        relevance_score REAL NOT NULL DEFAULT 0,
        content TEXT,
        on_topic INTEGER,
        matched_topics TEXT NOT NULL DEFAULT '[]',
        paper TEXT,
        created_at TEXT NOT NULL,
        UNIQUE(source, link)
    )",
    "CREATE INDEX IF NOT EXISTS idx_articles_created_at ON articles(created_at)",
    "CREATE TABLE IF NOT EXISTS user_preferences (
        keyword TEXT PRIMARY KEY,
        score REAL NOT NULL,
        samples INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT NOT NULL
    )",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserPreference {
    pub keyword: String,
    /// Mean of every feedback score recorded for this keyword.
    pub score: f64,
    pub samples: i64,
}

type ArticleRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    f64,
    Option<String>,
    Option<i64>,
    String,
    Option<String>,
);

#[derive(Clone)]
pub struct ArticleStore {
    pool: SqlitePool,
    clock: SharedClock,
}

/// Fixed-width UTC form, so text comparison in SQL orders correctly.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl ArticleStore {
    /// Open (creating if needed) the database at `database_url` and ensure the schema.
    pub async fn connect(database_url: &str, clock: SharedClock) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url `{database_url}`"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let mut pool_opts = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(5));
        // every connection to `:memory:` is its own database, so keep exactly one alive
        pool_opts = if database_url.contains(":memory:") {
            pool_opts.max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            pool_opts.max_connections(5)
        };
        let pool = pool_opts
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {database_url}"))?;
        let store = Self { pool, clock };
        store.init_schema().await?;
        info!(database_url, "article store ready");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("creating schema")?;
        }
        Ok(())
    }

    /// Insert or update (keyed by source + link). Returns rows written.
    pub async fn save_batch(&self, articles: &[NormalizedArticle]) -> Result<usize> {
        if articles.is_empty() {
            return Ok(0);
        }
        let now = ts(self.clock.now());
        let mut tx = self.pool.begin().await.context("begin transaction")?;
        for a in articles {
            sqlx::query(
                "INSERT INTO articles
                    (source, title, link, published, summary, keywords, relevance_score,
                     content, on_topic, matched_topics, paper, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(source, link) DO UPDATE SET
                    title = excluded.title,
                    summary = excluded.summary,
                    keywords = excluded.keywords,
                    relevance_score = excluded.relevance_score,
                    content = excluded.content,
                    on_topic = excluded.on_topic,
                    matched_topics = excluded.matched_topics,
                    paper = excluded.paper",
            )
            .bind(a.source.as_str())
            .bind(&a.title)
            .bind(&a.link)
            .bind(ts(a.published))
            .bind(&a.summary)
            .bind(serde_json::to_string(&a.keywords)?)
            .bind(f64::from(a.relevance_score))
            .bind(&a.content)
            .bind(a.on_topic.map(i64::from))
            .bind(serde_json::to_string(&a.matched_topics)?)
            .bind(a.paper.as_ref().map(serde_json::to_string).transpose()?)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!(error = %e, link = %a.link, "failed to save article");
                e
            })
            .context("saving article")?;
        }
        tx.commit().await.context("commit articles")?;
        debug!(count = articles.len(), "articles saved");
        Ok(articles.len())
    }

    /// Articles first stored within the last `hours`, newest publication first.
    /// An empty `sources` slice means every source. A window too large for a timestamp
    /// covers everything stored.
    pub async fn recent_articles(&self, hours: u64, sources: &[Source]) -> Result<Vec<NormalizedArticle>> {
        let since = i64::try_from(hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .and_then(|window| self.clock.now().checked_sub_signed(window));
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT source, title, link, published, summary, keywords, relevance_score,
                    content, on_topic, matched_topics, paper
             FROM articles WHERE 1 = 1",
        );
        if let Some(since) = since {
            qb.push(" AND created_at >= ");
            qb.push_bind(ts(since));
        }
        if !sources.is_empty() {
            qb.push(" AND source IN (");
            let mut sep = qb.separated(", ");
            for s in sources {
                sep.push_bind(s.as_str());
            }
            sep.push_unseparated(")");
        }
        qb.push(" ORDER BY published DESC, id ASC");

        let rows: Vec<ArticleRow> = qb
            .build_query_as::<ArticleRow>()
            .fetch_all(&self.pool)
            .await
            .context("querying recent articles")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_article(row) {
                Ok(a) => out.push(a),
                Err(e) => error!(error = ?e, "skipping unreadable article row"),
            }
        }
        Ok(out)
    }

    /// Fold `score` into the running mean for `keyword` (lowercased).
    pub async fn update_preference(&self, keyword: &str, score: f64) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_preferences (keyword, score, samples, updated_at)
             VALUES (?, ?, 1, ?)
             ON CONFLICT(keyword) DO UPDATE SET
                score = (user_preferences.score * user_preferences.samples + excluded.score)
                        / (user_preferences.samples + 1),
                samples = user_preferences.samples + 1,
                updated_at = excluded.updated_at",
        )
        .bind(keyword.to_lowercase())
        .bind(score)
        .bind(ts(self.clock.now()))
        .execute(&self.pool)
        .await
        .context("updating preference")?;
        Ok(())
    }

    /// Highest score first.
    pub async fn preferences(&self) -> Result<Vec<UserPreference>> {
        let rows: Vec<(String, f64, i64)> = sqlx::query_as(
            "SELECT keyword, score, samples FROM user_preferences ORDER BY score DESC, keyword ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("querying preferences")?;
        Ok(rows
            .into_iter()
            .map(|(keyword, score, samples)| UserPreference {
                keyword,
                score,
                samples,
            })
            .collect())
    }
}

fn row_to_article(row: ArticleRow) -> Result<NormalizedArticle> {
    let (source, title, link, published, summary, keywords, score, content, on_topic, topics, paper) = row;
    Ok(NormalizedArticle {
        source: source.parse()?,
        title,
        link,
        published: DateTime::parse_from_rfc3339(&published)
            .context("published timestamp")?
            .with_timezone(&Utc),
        summary,
        keywords: serde_json::from_str(&keywords).context("keywords json")?,
        relevance_score: score as f32,
        content,
        on_topic: on_topic.map(|v| v != 0),
        matched_topics: serde_json::from_str(&topics).context("topics json")?,
        paper: paper
            .map(|p| serde_json::from_str(&p))
            .transpose()
            .context("paper json")?,
    })
}

#[async_trait::async_trait]
impl ArticleSink for ArticleStore {
    async fn save_articles(&self, items: &[NormalizedArticle]) -> Result<()> {
        self.save_batch(items).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn article(source: Source, link: &str, score: f32) -> NormalizedArticle {
        NormalizedArticle {
            source,
            title: format!("title {link}"),
            link: link.to_string(),
            published: Utc.with_ymd_and_hms(2025, 2, 10, 7, 0, 0).unwrap(),
            summary: "summary".to_string(),
            keywords: vec!["agents".to_string()],
            relevance_score: score,
            content: None,
            on_topic: Some(true),
            matched_topics: vec![],
            paper: None,
        }
    }

    async fn store() -> (ArticleStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 2, 10, 8, 0, 0).unwrap()));
        let s = ArticleStore::connect("sqlite::memory:", clock.clone()).await.unwrap();
        (s, clock)
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_source_and_link() {
        let (s, _) = store().await;
        s.save_batch(&[article(Source::TheVerge, "https://x/1", 3.0)]).await.unwrap();
        let mut updated = article(Source::TheVerge, "https://x/1", 8.0);
        updated.summary = "better summary".to_string();
        s.save_batch(&[updated, article(Source::TechCrunch, "https://x/1", 1.0)])
            .await
            .unwrap();

        let all = s.recent_articles(24, &[]).await.unwrap();
        assert_eq!(all.len(), 2);
        let verge = s.recent_articles(24, &[Source::TheVerge]).await.unwrap();
        assert_eq!(verge.len(), 1);
        assert_eq!(verge[0].summary, "better summary");
        assert_eq!(verge[0].relevance_score, 8.0);
        assert_eq!(verge[0].on_topic, Some(true));
    }

    #[tokio::test]
    async fn recent_window_uses_insert_time() {
        let (s, clock) = store().await;
        s.save_batch(&[article(Source::Stanford, "https://x/old", 1.0)]).await.unwrap();
        clock.advance(chrono::Duration::hours(30));
        s.save_batch(&[article(Source::Stanford, "https://x/new", 1.0)]).await.unwrap();

        let recent = s.recent_articles(24, &[Source::Stanford]).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].link, "https://x/new");
    }

    #[tokio::test]
    async fn oversized_window_returns_everything() {
        let (s, clock) = store().await;
        s.save_batch(&[article(Source::Arxiv, "https://x/1", 1.0)]).await.unwrap();
        clock.advance(chrono::Duration::days(400));

        assert!(s.recent_articles(24, &[]).await.unwrap().is_empty());
        assert_eq!(s.recent_articles(1_000_000_000_000, &[]).await.unwrap().len(), 1);
        assert_eq!(s.recent_articles(u64::MAX, &[]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn preferences_average_scores() {
        let (s, _) = store().await;
        s.update_preference("Agents", 1.0).await.unwrap();
        s.update_preference("agents", 0.0).await.unwrap();
        s.update_preference("robots", 0.9).await.unwrap();
        let prefs = s.preferences().await.unwrap();
        assert_eq!(prefs[0].keyword, "robots");
        assert_eq!(prefs[1].keyword, "agents");
        assert!((prefs[1].score - 0.5).abs() < 1e-9);
        assert_eq!(prefs[1].samples, 2);
    }
}
