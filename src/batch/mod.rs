//! # Request Batching Module
//!
//! Collects the keys requested during one tick and resolves all of them with a
//! single bulk fetch per loader.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RecordSource`] | Persistence collaborator: one `fetch_by_keys` call for a set of keys |
//! | [`LoaderId`] | Identity of a loader; keys of different loaders never share a fetch |
//! | [`Loader`] | Handle used by resolvers to request records for a key |
//! | [`LoadFuture`] | Resolves once the tick that queued its key has been flushed |
//!
//! ## Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use fragment_dataloader::batch::{LoaderId, RecordSource};
//! use fragment_dataloader::{Result, Scheduler};
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! struct Post { user_id: u64, title: String }
//!
//! struct PostsByUser;
//!
//! #[async_trait]
//! impl RecordSource for PostsByUser {
//!     type Key = u64;
//!     type Record = Post;
//!     fn loader_id(&self) -> LoaderId { LoaderId::new("posts_by_user") }
//!     async fn fetch_by_keys(&self, keys: &[u64]) -> Result<Vec<Post>> {
//!         Ok(keys.iter().map(|&id| Post { user_id: id, title: format!("post of {id}") }).collect())
//!     }
//!     fn key_of(&self, post: &Post) -> u64 { post.user_id }
//! }
//!
//! # tokio_test::block_on(async {
//! let scheduler = Scheduler::new();
//! let posts = scheduler.loader(Arc::new(PostsByUser));
//! let (a, b) = scheduler
//!     .run(async { futures::join!(posts.load(1), posts.load(2)) })
//!     .await;
//! assert_eq!(a.unwrap().len(), 1);
//! assert_eq!(b.unwrap()[0].title, "post of 2");
//! # });
//! ```

mod collector;
mod loader;

pub use collector::{LoadFuture, Loader};

use crate::Result;
use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt::Debug;
use std::hash::Hash;

/// Identity of a loader. Two loaders with the same id share one queue per
/// tick, so an id must map to exactly one [`RecordSource`] type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(Cow<'static, str>);

impl LoaderId {
    pub const fn new(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }
    pub fn owned(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LoaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bulk, keyed view over the persistence layer.
///
/// `fetch_by_keys` is called at most once per tick per loader id (or once per
/// chunk when [`max_batch_size`](RecordSource::max_batch_size) is set). The
/// returned records are grouped back to their keys with [`key_of`](RecordSource::key_of);
/// a key with no records resolves to an empty list.
#[async_trait]
pub trait RecordSource: Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;
    type Record: Clone + Send + Sync + 'static;

    fn loader_id(&self) -> LoaderId;

    async fn fetch_by_keys(&self, keys: &[Self::Key]) -> Result<Vec<Self::Record>>;

    fn key_of(&self, record: &Self::Record) -> Self::Key;

    /// Upper bound on keys per `fetch_by_keys` call. `None` means one call per tick.
    fn max_batch_size(&self) -> Option<usize> {
        None
    }
}
