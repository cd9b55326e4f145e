//! The one article shape every downstream component works with.
//!
//! Adapters turn whatever their upstream returns into [`NormalizedArticle`] at the
//! boundary; the aggregator, store, chat and API never see per-source layouts.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NOT_ENOUGH_TEXT: &str = "Not enough text to summarize.";
pub const SUMMARY_FAILED: &str = "Summarization failed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Arxiv,
    TechCrunch,
    VentureBeat,
    Stanford,
    TheVerge,
    TheHackerNews,
}

impl Source {
    pub const ALL: [Source; 6] = [
        Source::Arxiv,
        Source::TechCrunch,
        Source::VentureBeat,
        Source::Stanford,
        Source::TheVerge,
        Source::TheHackerNews,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Arxiv => "arxiv",
            Source::TechCrunch => "techcrunch",
            Source::VentureBeat => "venturebeat",
            Source::Stanford => "stanford",
            Source::TheVerge => "theverge",
            Source::TheHackerNews => "thehackernews",
        }
    }

    /// Human label for prompts and logs.
    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Arxiv => "arXiv",
            Source::TechCrunch => "TechCrunch",
            Source::VentureBeat => "VentureBeat",
            Source::Stanford => "Stanford AI Lab",
            Source::TheVerge => "The Verge",
            Source::TheHackerNews => "The Hacker News",
        }
    }

    /// Parse a user-supplied list, dropping unknown names and duplicates, sorted.
    pub fn parse_selection<I, S>(names: I) -> Vec<Source>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<Source> = names
            .into_iter()
            .filter_map(|n| n.as_ref().parse().ok())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source `{0}`")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase();
        Source::ALL
            .iter()
            .copied()
            .find(|src| src.as_str() == norm)
            .ok_or(UnknownSource(s.to_string()))
    }
}

/// arXiv-only extras.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperMeta {
    pub arxiv_id: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    /// Local path when the PDF was downloaded and validated.
    #[serde(default)]
    pub pdf_path: Option<String>,
    /// style name ("apa", "mla", ...) -> formatted citation
    #[serde(default)]
    pub citations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedArticle {
    pub source: Source,
    pub title: String,
    /// Unique per source.
    pub link: String,
    pub published: DateTime<Utc>,
    pub summary: String,
    /// Distinct, lowercase, first-seen order.
    pub keywords: Vec<String>,
    /// Canonical 0..=10 relevance score.
    pub relevance_score: f32,
    #[serde(default)]
    pub content: Option<String>,
    /// Result of the on-topic classification, when it ran.
    #[serde(default)]
    pub on_topic: Option<bool>,
    /// Topic keywords matched by the cheap detector (THN style).
    #[serde(default)]
    pub matched_topics: Vec<String>,
    #[serde(default)]
    pub paper: Option<PaperMeta>,
}

impl NormalizedArticle {
    pub fn summary_failed(&self) -> bool {
        self.summary == SUMMARY_FAILED
    }

    /// Title plus summary, the text that keyword counting and ranking look at.
    pub fn headline_text(&self) -> String {
        format!("{} {}", self.title, self.summary)
    }
}
