//! Runs the users → posts query three times (no cache, cold cache, warm cache)
//! against an in-memory database and prints how many round-trips each run made.
//!
//! Cache mode and TTL come from `FRAGMENT_CACHE_MODE` / `FRAGMENT_CACHE_TTL_SECS`
//! (defaults: direct, 60 s). Set `RUST_LOG=fragment_dataloader=debug` to see ticks.

use async_trait::async_trait;
use fragment_dataloader::cache::{CacheConfig, FragmentCache, MemoryStore};
use fragment_dataloader::{
    CacheMode, Coordinator, CoordinatorConfig, FragmentRequest, LoaderId, RecordSource, Scheduler,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Post {
    id: u64,
    user_id: u64,
    title: String,
}

/// Stand-in for the relational store; counts SELECTs.
struct Database {
    users: Vec<User>,
    posts: Vec<Post>,
    selects: AtomicUsize,
}

impl Database {
    fn seeded() -> Self {
        let users = vec![
            User { id: 1, name: "Alice".into() },
            User { id: 2, name: "Bob".into() },
        ];
        let mut posts = Vec::new();
        for i in 0..5 {
            for user in &users {
                posts.push(Post {
                    id: posts.len() as u64 + 1,
                    user_id: user.id,
                    title: format!("{} Post {}", user.name, i),
                });
            }
        }
        Self {
            users,
            posts,
            selects: AtomicUsize::new(0),
        }
    }

    async fn all_users(&self) -> Vec<User> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.users.clone()
    }
}

struct PostsByUser(Arc<Database>);

#[async_trait]
impl RecordSource for PostsByUser {
    type Key = u64;
    type Record = Post;

    fn loader_id(&self) -> LoaderId {
        LoaderId::new("posts_by_user")
    }

    async fn fetch_by_keys(&self, user_ids: &[u64]) -> fragment_dataloader::Result<Vec<Post>> {
        self.0.selects.fetch_add(1, Ordering::SeqCst);
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

#[derive(Debug, Serialize)]
struct UserWithPosts {
    #[serde(flatten)]
    user: User,
    posts: Vec<Post>,
}

async fn users_with_posts(
    db: Arc<Database>,
    cache: Arc<FragmentCache>,
    config: CoordinatorConfig,
    use_cache: bool,
) -> anyhow::Result<Vec<UserWithPosts>> {
    let scheduler = Scheduler::new();
    let posts = scheduler.loader(Arc::new(PostsByUser(Arc::clone(&db))));
    let coordinator = Coordinator::new(&scheduler, cache, config);
    let mode = if use_cache {
        coordinator.config().mode
    } else {
        CacheMode::Disabled
    };

    let result = scheduler
        .run(async {
            let users = db.all_users().await;
            let user_ids: Vec<u64> = users.iter().map(|u| u.id).collect();
            let fields = user_ids.into_iter().map(|user_id| {
                let posts = posts.clone();
                let request = FragmentRequest::new("users.posts", user_id)
                    .with_arguments(json!({ "useCache": use_cache }))
                    .with_mode(mode);
                coordinator.resolve(request, move || posts.load(user_id))
            });
            let all_posts = futures::future::try_join_all(fields).await?;
            Ok::<_, fragment_dataloader::Error>(
                users
                    .into_iter()
                    .zip(all_posts)
                    .map(|(user, posts)| UserWithPosts { user, posts })
                    .collect(),
            )
        })
        .await?;

    tracing::info!(ticks = scheduler.tick_count(), "request resolved");
    Ok(result)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = CoordinatorConfig::from_env()?;
    let db = Arc::new(Database::seeded());
    let cache = Arc::new(FragmentCache::new(
        CacheConfig::new(),
        Arc::new(MemoryStore::default()),
    ));

    println!("cache mode: {:?}, ttl: {:?}", config.mode, config.ttl);
    let mut last = Vec::new();
    for (label, use_cache) in [("no cache", false), ("cold cache", true), ("warm cache", true)] {
        let before_selects = db.selects.load(Ordering::SeqCst);
        let before = cache.stats();

        let users = users_with_posts(Arc::clone(&db), Arc::clone(&cache), config.clone(), use_cache).await?;

        let after = cache.stats();
        println!("\n=== {} ===", label);
        println!(
            "users: {}, posts: {}",
            users.len(),
            users.iter().map(|u| u.posts.len()).sum::<usize>()
        );
        println!("SELECTs:          {}", db.selects.load(Ordering::SeqCst) - before_selects);
        println!("cache read_many:  {}", after.read_many_calls - before.read_many_calls);
        println!("cache exists:     {}", after.exists_calls - before.exists_calls);
        println!("cache writes:     {}", after.writes - before.writes);
        last = users;
    }

    println!("\n{}", serde_json::to_string_pretty(&json!({ "data": { "users": last } }))?);
    Ok(())
}
