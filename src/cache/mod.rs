//! # Fragment Cache Module
//!
//! Keyed storage for serialized response fragments, with a single bulk read
//! per tick and optional per-key existence probes.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`FragmentCache`] | Store wrapper: key prefixing, size limit, JSON encoding, [`CacheStats`] |
//! | [`CacheConfig`] | Entry size limit, key prefix |
//! | [`FragmentStore`] | Trait for backing stores (`read_many` / `exists` / `write`) |
//! | [`MemoryStore`] | In-memory LRU store with expiry checked at read time |
//! | [`NullStore`] | Store that never holds anything |
//! | [`FragmentKeyGenerator`] | Derives a [`CacheKey`] from path, parent id and arguments |
//!
//! ## Example
//!
//! ```rust
//! use fragment_dataloader::cache::{CacheConfig, FragmentCache, FragmentKeyGenerator, MemoryStore};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let cache = FragmentCache::new(
//!     CacheConfig::new().with_key_prefix("gql"),
//!     Arc::new(MemoryStore::new(1000)),
//! );
//! let key = FragmentKeyGenerator::new().generate("users.posts", &json!(1), &json!({}));
//! assert!(key.as_str().starts_with("users.posts/"));
//! # let _ = cache;
//! ```
//!
//! Entries are never mutated in place: a write replaces the previous value
//! under the same key, and expiry makes an entry indistinguishable from a
//! missing one.

mod backend;
mod key;
mod manager;

pub use backend::{FragmentStore, MemoryStore, NullStore};
pub use key::{CacheKey, FragmentKeyGenerator};
pub use manager::{CacheConfig, CacheStats, FragmentCache};
