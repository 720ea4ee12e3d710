//! Fragment store implementations.

use super::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Clone)]
struct CacheEntry {
    value: Vec<u8>,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

/// Backing store for serialized fragments.
///
/// Implementations must treat an expired entry exactly like a missing one.
#[async_trait]
pub trait FragmentStore: Send + Sync {
    /// One round-trip for every key; absent and expired keys are left out of the map.
    async fn read_many(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, Vec<u8>>>;
    async fn exists(&self, key: &CacheKey) -> Result<bool>;
    /// Replaces any previous entry under `key`.
    async fn write(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// In-process store with least-recently-used eviction.
pub struct MemoryStore {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|(_, e)| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl FragmentStore for MemoryStore {
    async fn read_many(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, Vec<u8>>> {
        let mut entries = self.lock();
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let expired = match entries.get(key) {
                Some(entry) if entry.is_expired() => true,
                Some(entry) => {
                    found.insert(key.clone(), entry.value.clone());
                    false
                }
                None => false,
            };
            if expired {
                entries.pop(key);
            }
        }
        Ok(found)
    }
    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(self
            .lock()
            .peek(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false))
    }
    async fn write(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        self.lock()
            .put(key.clone(), CacheEntry::new(value.to_vec(), ttl));
        Ok(())
    }
    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Store that never holds anything.
pub struct NullStore;
impl NullStore {
    pub fn new() -> Self {
        Self
    }
}
impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FragmentStore for NullStore {
    async fn read_many(&self, _: &[CacheKey]) -> Result<HashMap<CacheKey, Vec<u8>>> {
        Ok(HashMap::new())
    }
    async fn exists(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn write(&self, _: &CacheKey, _: &[u8], _: Duration) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
