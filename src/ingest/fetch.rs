// src/ingest/fetch.rs
//! Network collaborators of the adapters: article body text and binary (PDF) downloads.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::model::truncate_chars;

/// Paragraphs at or below this length are navigation/caption noise.
pub const MIN_PARAGRAPH_CHARS: usize = 20;
pub const MAX_ARTICLE_CHARS: usize = 3000;

pub const PDF_ATTEMPTS: u32 = 3;
pub const PDF_BASE_DELAY: Duration = Duration::from_secs(1);
const PDF_MIN_BYTES: usize = 1024;

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("Mozilla/5.0 (compatible; ai-research-hub/0.1)")
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .context("building http client")
}

/// Fetches the readable body text of an article page.
#[async_trait]
pub trait TextFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

pub struct HttpTextFetcher {
    client: reqwest::Client,
}

impl HttpTextFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(10))?,
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TextFetcher for HttpTextFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        if !resp.status().is_success() {
            return Err(anyhow!("GET {url}: status {}", resp.status()));
        }
        let html = resp.text().await.context("reading article body")?;
        Ok(extract_paragraph_text(&html))
    }
}

/// Canned page texts keyed by URL; unknown URLs fail. For tests and offline runs.
#[derive(Default, Clone)]
pub struct FixtureTextFetcher {
    pages: HashMap<String, String>,
}

impl FixtureTextFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.pages.insert(url.into(), text.into());
        self
    }
}

#[async_trait]
impl TextFetcher for FixtureTextFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no fixture page for {url}"))
    }
}

static PARAGRAPH_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p").expect("paragraph selector"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

/// Join the text of every `<p>` longer than [`MIN_PARAGRAPH_CHARS`], cut to
/// [`MAX_ARTICLE_CHARS`].
pub fn extract_paragraph_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts = Vec::new();
    for p in document.select(&PARAGRAPH_SELECTOR) {
        let raw: String = p.text().collect();
        let text = RE_WS.replace_all(raw.trim(), " ");
        if text.chars().count() > MIN_PARAGRAPH_CHARS {
            parts.push(text.into_owned());
        }
    }
    let joined = parts.join(" ");
    truncate_chars(&joined, MAX_ARTICLE_CHARS).to_string()
}

/* ----------------------------
PDF download (arXiv)
---------------------------- */

/// Structural sanity check: big enough, `%PDF` header, `%%EOF` in the trailing 128 bytes.
pub fn is_valid_pdf(bytes: &[u8]) -> bool {
    if bytes.len() < PDF_MIN_BYTES || !bytes.starts_with(b"%PDF") {
        return false;
    }
    let tail = &bytes[bytes.len().saturating_sub(128)..];
    tail.windows(5).any(|w| w == b"%%EOF")
}

/// Run `attempt` up to `attempts` times, sleeping `base_delay * n` after the n-th failure.
/// A response that fails [`is_valid_pdf`] counts as a failure.
pub async fn fetch_pdf_with_retry<F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut attempt: F,
) -> Result<Vec<u8>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<u8>>>,
{
    let attempts = attempts.max(1);
    let mut last_err = anyhow!("no attempts made");
    for n in 1..=attempts {
        match attempt().await {
            Ok(bytes) if is_valid_pdf(&bytes) => return Ok(bytes),
            Ok(bytes) => {
                last_err = anyhow!("invalid pdf structure ({} bytes)", bytes.len());
            }
            Err(e) => last_err = e,
        }
        warn!(target: "ingest", attempt = n, error = %last_err, "pdf download attempt failed");
        if n < attempts {
            tokio::time::sleep(base_delay * n).await;
        }
    }
    Err(last_err.context(format!("pdf download failed after {attempts} attempts")))
}

/// `{title_slug}_{arxiv_id}.pdf`, title cut to 50 chars.
pub fn pdf_file_name(title: &str, arxiv_id: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(50)
        .collect();
    let id: String = arxiv_id
        .chars()
        .map(|c| if c == '/' { '_' } else { c })
        .collect();
    format!("{}_{}.pdf", slug.trim_matches('_'), id)
}

/// Download `url` into `dir` unless a file with the same name already exists.
pub async fn download_pdf(
    client: &reqwest::Client,
    url: &str,
    dir: &Path,
    file_name: &str,
) -> Result<PathBuf> {
    let dest = dir.join(file_name);
    if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
        debug!(target: "ingest", path = %dest.display(), "pdf already on disk");
        return Ok(dest);
    }

    let bytes = fetch_pdf_with_retry(PDF_ATTEMPTS, PDF_BASE_DELAY, move || async move {
        let resp = client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?;
        Ok::<Vec<u8>, anyhow::Error>(resp.bytes().await?.to_vec())
    })
    .await?;

    tokio::fs::create_dir_all(dir).await?;
    let tmp = dest.with_extension("pdf.part");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, &dest).await?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fake_pdf() -> Vec<u8> {
        let mut v = b"%PDF-1.7\n".to_vec();
        v.resize(2048, b' ');
        v.extend_from_slice(b"\n%%EOF\n");
        v
    }

    #[test]
    fn paragraphs_are_filtered_and_joined() {
        let html = r#"<html><body>
            <p>Short one.</p>
            <p>The model improves reasoning benchmarks by a wide margin.</p>
            <nav><p>Subscribe</p></nav>
            <p>  Researchers   released the weights under an open license.  </p>
        </body></html>"#;
        assert_eq!(
            extract_paragraph_text(html),
            "The model improves reasoning benchmarks by a wide margin. \
             Researchers released the weights under an open license."
        );
    }

    #[test]
    fn pdf_validation() {
        assert!(is_valid_pdf(&fake_pdf()));
        assert!(!is_valid_pdf(b"%PDF tiny %%EOF"));
        let mut no_eof = fake_pdf();
        no_eof.truncate(2040);
        assert!(!is_valid_pdf(&no_eof));
        let mut html = fake_pdf();
        html[..4].copy_from_slice(b"<htm");
        assert!(!is_valid_pdf(&html));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_a_valid_pdf_arrives() {
        let calls = AtomicU32::new(0);
        let out = fetch_pdf_with_retry(3, Duration::from_secs(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Err(anyhow!("timeout")),
                    1 => Ok(b"<html>rate limited</html>".to_vec()),
                    _ => Ok(fake_pdf()),
                }
            }
        })
        .await;
        assert!(out.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_last_attempt() {
        let calls = AtomicU32::new(0);
        let out = fetch_pdf_with_retry(3, Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<Vec<u8>, _>(anyhow!("503")) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn pdf_names_are_filesystem_safe() {
        assert_eq!(
            pdf_file_name("Attention Is All You Need?", "1706.03762v7"),
            "Attention_Is_All_You_Need_1706.03762v7.pdf"
        );
    }
}
