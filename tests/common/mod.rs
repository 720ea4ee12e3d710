//! Shared fixtures: an in-memory database that records every bulk fetch and a
//! fragment store that records every round-trip.

#![allow(dead_code)]

use async_trait::async_trait;
use fragment_dataloader::cache::{CacheKey, FragmentStore, MemoryStore};
use fragment_dataloader::{
    Coordinator, Error, ErrorContext, FragmentRequest, Loader, LoaderId, RecordSource, Result,
    Scheduler,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub user_id: u64,
    pub title: String,
}

/// `(loader id, keys)` of one `fetch_by_keys` call, or `("users", [])` for the root query.
pub type FetchLog = Arc<Mutex<Vec<(String, Vec<u64>)>>>;

pub struct Database {
    pub users: Vec<User>,
    pub posts: Vec<Post>,
    pub log: FetchLog,
    pub fail_posts: AtomicBool,
}

impl Database {
    /// `users` users named user-1.., each with `posts_per_user` posts.
    pub fn seeded(users: u64, posts_per_user: u64) -> Arc<Self> {
        let users: Vec<User> = (1..=users)
            .map(|id| User {
                id,
                name: format!("user-{}", id),
            })
            .collect();
        let mut posts = Vec::new();
        for user in &users {
            for i in 0..posts_per_user {
                posts.push(Post {
                    id: posts.len() as u64 + 1,
                    user_id: user.id,
                    title: format!("{} post {}", user.name, i),
                });
            }
        }
        Arc::new(Self {
            users,
            posts,
            log: Arc::new(Mutex::new(Vec::new())),
            fail_posts: AtomicBool::new(false),
        })
    }

    pub async fn all_users(&self) -> Vec<User> {
        self.log.lock().unwrap().push(("users".to_string(), vec![]));
        self.users.clone()
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn calls_for(&self, loader: &str) -> Vec<Vec<u64>> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| l == loader)
            .map(|(_, keys)| keys.clone())
            .collect()
    }

    fn record(&self, loader: &str, keys: &[u64]) {
        self.log
            .lock()
            .unwrap()
            .push((loader.to_string(), keys.to_vec()));
    }
}

pub struct PostsByUser(pub Arc<Database>);

#[async_trait]
impl RecordSource for PostsByUser {
    type Key = u64;
    type Record = Post;

    fn loader_id(&self) -> LoaderId {
        LoaderId::new("posts_by_user")
    }

    async fn fetch_by_keys(&self, user_ids: &[u64]) -> Result<Vec<Post>> {
        self.0.record("posts_by_user", user_ids);
        if self.0.fail_posts.load(Ordering::SeqCst) {
            return Err(Error::persistence_with_context(
                "posts table locked",
                ErrorContext::new()
                    .with_field_path("posts.user_id")
                    .with_source("posts"),
            ));
        }
        Ok(self
            .0
            .posts
            .iter()
            .filter(|p| user_ids.contains(&p.user_id))
            .cloned()
            .collect())
    }

    fn key_of(&self, post: &Post) -> u64 {
        post.user_id
    }
}

pub struct UsersById(pub Arc<Database>);

#[async_trait]
impl RecordSource for UsersById {
    type Key = u64;
    type Record = User;

    fn loader_id(&self) -> LoaderId {
        LoaderId::new("users_by_id")
    }

    async fn fetch_by_keys(&self, ids: &[u64]) -> Result<Vec<User>> {
        self.0.record("users_by_id", ids);
        Ok(self
            .0
            .users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    fn key_of(&self, user: &User) -> u64 {
        user.id
    }
}

/// Posts of one shard; each shard is its own loader.
pub struct ShardedPosts {
    pub db: Arc<Database>,
    pub shard: u64,
}

impl ShardedPosts {
    pub fn loader_name(shard: u64) -> String {
        format!("posts_shard_{}", shard)
    }
}

#[async_trait]
impl RecordSource for ShardedPosts {
    type Key = u64;
    type Record = Post;

    fn loader_id(&self) -> LoaderId {
        LoaderId::owned(Self::loader_name(self.shard))
    }

    async fn fetch_by_keys(&self, user_ids: &[u64]) -> Result<Vec<Post>> {
        self.db.record(&Self::loader_name(self.shard), user_ids);
        Ok(self
            .db
            .posts
            .iter()
            .filter(|p| user_ids.contains(&p.user_id) && p.id % 2 == self.shard)
            .cloned()
            .collect())
    }

    fn key_of(&self, post: &Post) -> u64 {
        post.user_id
    }
}

/// Memory store that logs every call it receives.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    pub read_many: Mutex<Vec<Vec<CacheKey>>>,
    pub exists: Mutex<Vec<CacheKey>>,
    pub writes: Mutex<Vec<CacheKey>>,
    pub fail_writes: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.read_many.lock().unwrap().len(),
            self.exists.lock().unwrap().len(),
            self.writes.lock().unwrap().len(),
        )
    }

    pub fn reset(&self) {
        self.read_many.lock().unwrap().clear();
        self.exists.lock().unwrap().clear();
        self.writes.lock().unwrap().clear();
    }
}

#[async_trait]
impl FragmentStore for RecordingStore {
    async fn read_many(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, Vec<u8>>> {
        self.read_many.lock().unwrap().push(keys.to_vec());
        self.inner.read_many(keys).await
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        self.exists.lock().unwrap().push(key.clone());
        self.inner.exists(key).await
    }

    async fn write(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        self.writes.lock().unwrap().push(key.clone());
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::cache_write_with_context(
                "read-only replica",
                Default::default(),
            ));
        }
        self.inner.write(key, value, ttl).await
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// The `users { posts(useCache:) }` query: one root fetch, then one posts
/// fragment per user resolved through the coordinator.
pub async fn users_with_posts(
    db: &Arc<Database>,
    scheduler: &Scheduler,
    coordinator: &Coordinator,
    use_cache: bool,
) -> Result<Vec<(User, Vec<Post>)>> {
    let posts: Loader<PostsByUser> = scheduler.loader(Arc::new(PostsByUser(Arc::clone(db))));
    scheduler
        .run(async {
            let users = db.all_users().await;
            let ids: Vec<u64> = users.iter().map(|u| u.id).collect();
            let fields = ids.into_iter().map(|id| {
                let posts = posts.clone();
                let mut request = FragmentRequest::new("users.posts", id)
                    .with_arguments(json!({ "useCache": use_cache }));
                if !use_cache {
                    request = request.with_mode(fragment_dataloader::CacheMode::Disabled);
                }
                coordinator.resolve(request, move || posts.load(id))
            });
            let all_posts = futures::future::try_join_all(fields).await?;
            Ok(users.into_iter().zip(all_posts).collect())
        })
        .await
}
