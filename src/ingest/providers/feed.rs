//! RSS 2.0 / Atom parsing shared by the feed-backed providers.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;
use url::Url;

use crate::ingest::normalize_text;

/// Flattened feed item; RSS and Atom both map onto this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub id: Option<String>,
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    /// Raw date text that was present but could not be parsed.
    pub bad_date: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    /// Atom `<link title="pdf">` (arXiv).
    pub pdf_link: Option<String>,
}

/* ---------- RSS 2.0 ---------- */

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<String>,
    #[serde(rename = "dc:creator", default)]
    creator: Vec<String>,
    #[serde(default)]
    category: Vec<Text>,
}

/* ---------- Atom ---------- */

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}
#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<Text>,
    #[serde(default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<Text>,
    content: Option<Text>,
    #[serde(default)]
    author: Vec<AtomAuthor>,
    #[serde(default)]
    category: Vec<AtomCategory>,
}
#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
    #[serde(rename = "@title")]
    title: Option<String>,
}
#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
}
#[derive(Debug, Deserialize)]
struct AtomCategory {
    #[serde(rename = "@term")]
    term: Option<String>,
}

/// Element text that may also carry attributes (`<title type="html">`).
#[derive(Debug, Deserialize, Default)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

pub fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| Utc.timestamp_opt(dt.unix_timestamp(), 0).single())
}

pub fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc3339)
        .ok()
        .and_then(|dt| Utc.timestamp_opt(dt.unix_timestamp(), 0).single())
}

fn parse_any_date(ts: &str) -> Option<DateTime<Utc>> {
    parse_rfc2822(ts).or_else(|| parse_rfc3339(ts))
}

/// `(parsed, raw_if_unparseable)`. A blank or absent date is simply missing.
fn entry_date(raw: Option<&str>) -> (Option<DateTime<Utc>>, Option<String>) {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => (None, None),
        Some(ts) => match parse_any_date(ts) {
            Some(at) => (Some(at), None),
            None => (None, Some(ts.to_string())),
        },
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn resolve_link(base: Option<&Url>, link: &str) -> String {
    let link = link.trim();
    match base {
        Some(b) if Url::parse(link).is_err() => b
            .join(link)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| link.to_string()),
        _ => link.to_string(),
    }
}

/// Parse an RSS 2.0 or Atom document. Entries without a title or a link are skipped.
/// `base` resolves relative links.
pub fn parse_feed(xml: &str, base: Option<&Url>) -> Result<Vec<FeedEntry>> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);

    let is_atom = xml_clean
        .find("<feed")
        .map(|i| xml_clean.find("<rss").map_or(true, |j| i < j))
        .unwrap_or(false);

    let entries = if is_atom {
        let feed: AtomFeed = from_str(&xml_clean).context("parsing atom xml")?;
        feed.entry
            .into_iter()
            .filter_map(|e| atom_entry(e, base))
            .collect::<Vec<_>>()
    } else {
        let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;
        rss.channel
            .item
            .into_iter()
            .filter_map(|it| rss_item(it, base))
            .collect::<Vec<_>>()
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("ingest_parse_ms").record(ms);
    Ok(entries)
}

fn rss_item(it: Item, base: Option<&Url>) -> Option<FeedEntry> {
    let title = normalize_text(it.title.as_deref().unwrap_or_default());
    let link = it
        .link
        .filter(|l| !l.trim().is_empty())
        .or_else(|| it.guid.as_ref().map(|g| g.value.clone()))
        .filter(|l| l.starts_with("http") || base.is_some())?;
    if title.is_empty() {
        return None;
    }
    let (published, bad_date) = entry_date(it.pub_date.as_deref());
    Some(FeedEntry {
        id: it.guid.map(|g| g.value),
        title,
        link: resolve_link(base, &link),
        published,
        bad_date,
        summary: it.description.map(|d| normalize_text(&d)).and_then(non_empty),
        content: it
            .content_encoded
            .map(|c| normalize_text(&c))
            .and_then(non_empty),
        authors: it
            .creator
            .into_iter()
            .map(|c| normalize_text(&c))
            .filter(|c| !c.is_empty())
            .collect(),
        categories: it
            .category
            .into_iter()
            .map(|c| c.value.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        pdf_link: None,
    })
}

fn atom_entry(e: AtomEntry, base: Option<&Url>) -> Option<FeedEntry> {
    let title = normalize_text(&e.title.map(|t| t.value).unwrap_or_default());
    let alternate = e
        .link
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
        .or_else(|| e.link.first())
        .map(|l| l.href.clone())?;
    if title.is_empty() {
        return None;
    }
    let pdf_link = e
        .link
        .iter()
        .find(|l| l.title.as_deref() == Some("pdf"))
        .map(|l| resolve_link(base, &l.href));
    let (published, bad_date) = entry_date(e.published.as_deref().or(e.updated.as_deref()));

    Some(FeedEntry {
        id: e.id.map(|s| s.trim().to_string()),
        title,
        link: resolve_link(base, &alternate),
        published,
        bad_date,
        summary: e.summary.map(|s| normalize_text(&s.value)).and_then(non_empty),
        content: e.content.map(|c| normalize_text(&c.value)).and_then(non_empty),
        authors: e
            .author
            .into_iter()
            .filter_map(|a| a.name)
            .map(|n| normalize_text(&n))
            .filter(|n| !n.is_empty())
            .collect(),
        categories: e.category.into_iter().filter_map(|c| c.term).collect(),
        pdf_link,
    })
}

/// Replace HTML-only entities that are not defined in XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&hellip;", "...")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
