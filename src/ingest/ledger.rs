// src/ingest/ledger.rs
//! Per-source record of links that were already enriched.
//!
//! One JSON file per source under the ledger dir. A link in the ledger is never enriched
//! again by that source's adapter, across restarts. Each entry keeps the item's own
//! publication time, and only entries published before `now - retention` are pruned.
//! Retention is never shorter than the recency window, so a pruned link can no longer pass
//! the recency filter. Undated entries are kept for good: the recency filter treats an
//! undated item as new on every run, so the ledger is all that stops it.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::article::Source;
use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub processed_at: DateTime<Utc>,
    /// The item's publication time; `None` when the feed gave none.
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
}

/// Older files stored only the processing time per link.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Entry(LedgerEntry),
    Legacy(DateTime<Utc>),
}

impl From<StoredEntry> for LedgerEntry {
    fn from(e: StoredEntry) -> Self {
        match e {
            StoredEntry::Entry(e) => e,
            // publication time unknown, so never pruned
            StoredEntry::Legacy(at) => LedgerEntry {
                processed_at: at,
                published: None,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LedgerFileIn {
    #[serde(default)]
    processed_urls: HashMap<String, StoredEntry>,
    #[serde(default)]
    last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct LedgerFileOut<'a> {
    processed_urls: &'a HashMap<String, LedgerEntry>,
    last_update: Option<DateTime<Utc>>,
}

pub struct ProcessedLedger {
    path: PathBuf,
    source: Source,
    entries: HashMap<String, LedgerEntry>,
    last_update: Option<DateTime<Utc>>,
    retention: Option<Duration>,
    clock: SharedClock,
    dirty: bool,
}

impl ProcessedLedger {
    pub fn path_for(dir: &Path, source: Source) -> PathBuf {
        dir.join(format!("{}_processed.json", source.as_str()))
    }

    /// Load the ledger for `source`. A missing file is an empty ledger; an unreadable one
    /// is logged and also starts empty.
    pub fn load(dir: &Path, source: Source, retention: Option<Duration>, clock: SharedClock) -> Self {
        let path = Self::path_for(dir, source);
        let file = match read_ledger_file(&path) {
            Ok(Some(f)) => f,
            Ok(None) => LedgerFileIn::default(),
            Err(e) => {
                warn!(target: "ingest", %source, error = ?e, "processed ledger unreadable, starting empty");
                LedgerFileIn::default()
            }
        };

        let mut ledger = Self {
            path,
            source,
            entries: file
                .processed_urls
                .into_iter()
                .map(|(link, e)| (link, e.into()))
                .collect(),
            last_update: file.last_update,
            retention,
            clock,
            dirty: false,
        };
        let pruned = ledger.prune();
        if pruned > 0 {
            debug!(target: "ingest", %source, pruned, "pruned old ledger entries on load");
        }
        ledger
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn contains(&self, link: &str) -> bool {
        self.entries.contains_key(link)
    }

    pub fn entry(&self, link: &str) -> Option<LedgerEntry> {
        self.entries.get(link).copied()
    }

    /// Record `link` as processed now. Persisted on the next [`flush`](Self::flush).
    pub fn mark(&mut self, link: &str, published: Option<DateTime<Utc>>) {
        let entry = LedgerEntry {
            processed_at: self.clock.now(),
            published,
        };
        self.entries.insert(link.to_string(), entry);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Drop entries published before `now - retention`. Undated entries stay. Returns how
    /// many went.
    pub fn prune(&mut self) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let Some(cutoff) = self.clock.now().checked_sub_signed(retention) else {
            return 0;
        };
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.published.map_or(true, |published| published >= cutoff));
        let pruned = before - self.entries.len();
        if pruned > 0 {
            self.dirty = true;
        }
        pruned
    }

    /// Prune, then write atomically (tmp + rename). No-op when nothing changed.
    pub fn flush(&mut self) -> Result<()> {
        self.prune();
        if !self.dirty {
            return Ok(());
        }
        let now = self.clock.now();
        let file = LedgerFileOut {
            processed_urls: &self.entries,
            last_update: Some(now),
        };
        write_ledger_file(&self.path, &file)
            .with_context(|| format!("writing ledger {}", self.path.display()))?;
        self.last_update = Some(now);
        self.dirty = false;
        Ok(())
    }
}

fn read_ledger_file(path: &Path) -> Result<Option<LedgerFileIn>> {
    let raw = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let file = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(file))
}

fn write_ledger_file(path: &Path, file: &LedgerFileOut<'_>) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(file)?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(&json)?;
    f.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
