//! File-backed key/value cache with per-entry expiry.
//!
//! One JSON file per key under the cache directory. Every entry carries its own
//! `created_at` and `expiry_secs`; the age check happens lazily at read time against the
//! injected clock, there is no background sweep. Expired or unreadable entries are
//! removed best-effort when they are read.
//!
//! Caching is an optimization only: read failures are reported as a miss, write failures
//! are logged and swallowed. Concurrent writers to the same key race, last write wins.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::SharedClock;

pub const DEFAULT_CACHE_DIR: &str = "cache";
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(3600);

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cache_hits_total", "Cache reads served from a fresh entry.");
        describe_counter!(
            "cache_misses_total",
            "Cache reads that found nothing, an expired entry, or a corrupt entry."
        );
        describe_counter!("cache_errors_total", "Cache read/write I/O or decode failures.");
    });
}

/// Logical cache key.
///
/// Either caller supplied (`dashboard_data_arxiv-theverge`) or derived from a function name
/// plus a fingerprint of its serialized arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn logical(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// `"{function}_{fingerprint}"`.
    ///
    /// NOTE: DefaultHasher is a non-cryptographic digest; collisions are tolerated here.
    pub fn for_call<A: Serialize + ?Sized>(function: &str, args: &A) -> Self {
        let args_str = serde_json::to_string(args).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        args_str.hash(&mut hasher);
        Self(format!("{function}_{:016x}", hasher.finish()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    created_at: DateTime<Utc>,
    expiry_secs: u64,
    value: T,
}

impl<T> Envelope<T> {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        // Clock moved backwards: treat as fresh rather than thrash.
        age.num_milliseconds() < (self.expiry_secs as i64).saturating_mul(1000)
    }
}

#[derive(Clone)]
pub struct CacheStore {
    dir: PathBuf,
    clock: SharedClock,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, clock: SharedClock) -> Self {
        ensure_metrics_described();
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(target: "cache", error = %e, dir = %dir.display(), "cache dir not created");
        }
        Self { dir, clock }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Fresh value for `key`, or `None` on miss/expiry/corruption.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let path = cache_path(&self.dir, key);
        let raw = match fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(target: "cache", %key, error = %e, "cache read error");
                    counter!("cache_errors_total").increment(1);
                }
                counter!("cache_misses_total").increment(1);
                return None;
            }
        };

        let env: Envelope<T> = match serde_json::from_slice(&raw) {
            Ok(env) => env,
            Err(e) => {
                warn!(target: "cache", %key, error = %e, "corrupt cache entry, treating as miss");
                counter!("cache_errors_total").increment(1);
                counter!("cache_misses_total").increment(1);
                let _ = fs::remove_file(&path);
                return None;
            }
        };

        if !env.is_fresh(self.clock.now()) {
            debug!(target: "cache", %key, "cache entry expired");
            counter!("cache_misses_total").increment(1);
            let _ = fs::remove_file(&path);
            return None;
        }

        debug!(target: "cache", %key, "cache hit");
        counter!("cache_hits_total").increment(1);
        Some(env.value)
    }

    /// Store `value` under `key`. I/O failures are logged, never returned.
    pub fn put<T: Serialize>(&self, key: &CacheKey, value: &T, expiry: Duration) {
        let env = Envelope {
            created_at: self.clock.now(),
            expiry_secs: expiry.as_secs(),
            value,
        };
        if let Err(e) = write_cache_file(&self.dir, key, &env) {
            warn!(target: "cache", %key, error = %e, "cache write error");
            counter!("cache_errors_total").increment(1);
        }
    }

    /// Drop the entry for `key` (explicit refresh).
    pub fn invalidate(&self, key: &CacheKey) {
        let path = cache_path(&self.dir, key);
        match fs::remove_file(&path) {
            Ok(()) => debug!(target: "cache", %key, "cache entry invalidated"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(target: "cache", %key, error = %e, "cache invalidate error"),
        }
    }

    /// Read-through: return the cached value or compute, store and return a fresh one.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, expiry: Duration, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(hit) = self.get::<T>(key) {
            return hit;
        }
        let fresh = compute().await;
        self.put(key, &fresh, expiry);
        fresh
    }

    /// Like [`get_or_compute`](Self::get_or_compute) but only successful results are stored.
    pub async fn get_or_try_compute<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        expiry: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key) {
            return Ok(hit);
        }
        let fresh = compute().await?;
        self.put(key, &fresh, expiry);
        Ok(fresh)
    }
}

fn file_stem(key: &CacheKey) -> String {
    key.as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn cache_path(dir: &Path, key: &CacheKey) -> PathBuf {
    dir.join(format!("{}.json", file_stem(key)))
}

fn write_cache_file<T: Serialize>(dir: &Path, key: &CacheKey, value: &T) -> io::Result<()> {
    static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

    fs::create_dir_all(dir)?;
    let path = cache_path(dir, key);
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("json.{}.{seq}.tmp", std::process::id()));
    let json =
        serde_json::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(&json)?;
    fs::rename(tmp, path)?;
    Ok(())
}
