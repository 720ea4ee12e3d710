//! Fragment cache manager.

use super::backend::FragmentStore;
use super::key::CacheKey;
use crate::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entry_size: usize,
    pub key_prefix: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entry_size: 1024 * 1024,
            key_prefix: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}

/// Counters of every round-trip made to the backing store.
///
/// `hits` and `misses` are per key. A bulk hit that a later existence probe
/// rejects is moved to `misses`; a hit whose payload fails to decode stays a
/// hit and is counted under `errors` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub read_many_calls: u64,
    pub exists_calls: u64,
    pub writes: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    read_many_calls: AtomicU64,
    exists_calls: AtomicU64,
    writes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            read_many_calls: self.read_many_calls.load(Ordering::Relaxed),
            exists_calls: self.exists_calls.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Keyed fragment cache over an injected [`FragmentStore`].
///
/// Values are stored as JSON. The manager applies the key prefix, enforces
/// the entry size limit and keeps [`CacheStats`].
pub struct FragmentCache {
    config: CacheConfig,
    store: Arc<dyn FragmentStore>,
    stats: AtomicStats,
}

impl FragmentCache {
    pub fn new(config: CacheConfig, store: Arc<dyn FragmentStore>) -> Self {
        Self {
            config,
            store,
            stats: AtomicStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Bulk read. The returned map is keyed by the caller's (unprefixed) keys.
    pub async fn read_many(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, Vec<u8>>> {
        self.stats.read_many_calls.fetch_add(1, Ordering::Relaxed);
        let prefixed: Vec<CacheKey> = keys.iter().map(|k| self.prefix_key(k)).collect();
        match self.store.read_many(&prefixed).await {
            Ok(mut found) => {
                let mut out = HashMap::with_capacity(found.len());
                for (key, stored) in keys.iter().zip(prefixed.iter()) {
                    if let Some(value) = found.remove(stored) {
                        out.insert(key.clone(), value);
                    }
                }
                let hits = out.len() as u64;
                self.stats.hits.fetch_add(hits, Ordering::Relaxed);
                self.stats
                    .misses
                    .fetch_add(keys.len() as u64 - hits, Ordering::Relaxed);
                Ok(out)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub async fn exists(&self, key: &CacheKey) -> Result<bool> {
        self.stats.exists_calls.fetch_add(1, Ordering::Relaxed);
        self.store
            .exists(&self.prefix_key(key))
            .await
            .map_err(|e| {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                e
            })
    }

    /// Serialize `value` and store it. Entries over `max_entry_size` are
    /// skipped and reported as `Ok(false)`.
    pub async fn write<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> Result<bool> {
        let data = self.encode(value)?;
        self.write_encoded(key, &data, ttl).await
    }

    /// The payload [`write`](FragmentCache::write) would store for `value`.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Store an already encoded payload.
    pub async fn write_encoded(&self, key: &CacheKey, data: &[u8], ttl: Duration) -> Result<bool> {
        if data.len() > self.config.max_entry_size {
            tracing::debug!(key = %key, size = data.len(), "fragment too large to cache");
            return Ok(false);
        }
        match self.store.write(&self.prefix_key(key), data, ttl).await {
            Ok(()) => {
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Decode a stored payload; `None` if it no longer matches `T`.
    pub fn decode<T: DeserializeOwned>(&self, key: &CacheKey, data: &[u8]) -> Option<T> {
        match serde_json::from_slice(data) {
            Ok(val) => Some(val),
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "discarding undecodable cached fragment");
                None
            }
        }
    }

    /// Move `n` keys counted as hits by the last bulk read over to misses.
    pub(crate) fn reclassify_hits_as_misses(&self, n: u64) {
        if n > 0 {
            self.stats.hits.fetch_sub(n, Ordering::Relaxed);
            self.stats.misses.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    fn prefix_key(&self, key: &CacheKey) -> CacheKey {
        match self.config.key_prefix {
            Some(ref p) => key.prefixed(p),
            None => key.clone(),
        }
    }
}
