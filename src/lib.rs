//! # fragment-dataloader
//!
//! Batched record loading and fragment caching for API resolvers.
//!
//! ## Overview
//!
//! Resolving a list of N parent objects whose children come from a database
//! naturally issues N child queries ("N+1"). This crate collects the keys that
//! resolvers request during one *tick* and answers all of them with a single
//! bulk fetch per loader. A fragment cache sits in front of the loaders: all
//! fragments of a tick are looked up with one bulk read, and only misses fall
//! through to the (still batched) loaders.
//!
//! ## Key Features
//!
//! - **Batching**: [`batch::Loader`] queues keys; one [`batch::RecordSource::fetch_by_keys`] per tick
//! - **Tick driver**: [`Scheduler::run`] flushes queued work whenever the request is idle
//! - **Fragment cache**: [`cache::FragmentCache`] over a pluggable [`cache::FragmentStore`]
//! - **Coordination**: [`Coordinator::resolve`] combines both per [`CacheMode`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fragment_dataloader::cache::{CacheConfig, FragmentCache, MemoryStore};
//! use fragment_dataloader::{CacheMode, Coordinator, CoordinatorConfig, FragmentRequest, Scheduler};
//! use std::sync::Arc;
//!
//! # async fn demo(posts_source: Arc<impl fragment_dataloader::batch::RecordSource<Key = u64, Record = String>>) -> fragment_dataloader::Result<()> {
//! let cache = Arc::new(FragmentCache::new(CacheConfig::new(), Arc::new(MemoryStore::new(1000))));
//! let scheduler = Scheduler::new();
//! let posts = scheduler.loader(posts_source);
//! let coordinator = Coordinator::new(&scheduler, cache, CoordinatorConfig::new().with_mode(CacheMode::Deferred));
//!
//! let user_ids = vec![1u64, 2];
//! let all_posts = scheduler
//!     .run(futures::future::try_join_all(user_ids.into_iter().map(|id| {
//!         let posts = posts.clone();
//!         coordinator.resolve(FragmentRequest::new("users.posts", id), move || posts.load(id))
//!     })))
//!     .await?;
//! # let _ = all_posts;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Key collection and bulk fetching per loader |
//! | [`cache`] | Fragment stores, keys and the cache manager |
//! | [`scheduler`] | Cooperative tick driver |
//! | [`coordinator`] | Cache-aware fragment resolution |
//! | [`config`] | Coordinator configuration (code, env, YAML) |

pub mod batch;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod scheduler;

pub use batch::{LoadFuture, Loader, LoaderId, RecordSource};
pub use config::{CacheMode, ConfirmPolicy, CoordinatorConfig};
pub use coordinator::{Coordinator, FragmentRequest};
pub use scheduler::{Scheduler, TickContext};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
