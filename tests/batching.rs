//! Batch loading through the tick driver, counted at the persistence layer.

mod common;

use common::{Database, PostsByUser, ShardedPosts, UsersById};
use fragment_dataloader::{Error, Scheduler};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_n_parents_cause_one_fetch_with_union_of_keys() {
    let db = Database::seeded(25, 3);
    let scheduler = Scheduler::new();
    let posts = scheduler.loader(Arc::new(PostsByUser(db.clone())));

    let results = scheduler
        .run(async { join_all((1..=25).map(|id| posts.load(id))).await })
        .await;

    let calls = db.calls_for("posts_by_user");
    assert_eq!(calls.len(), 1, "expected a single bulk fetch, got {:?}", calls);
    let keys: BTreeSet<u64> = calls[0].iter().copied().collect();
    assert_eq!(keys, (1..=25).collect());

    for (i, result) in results.into_iter().enumerate() {
        let posts = result.unwrap();
        assert_eq!(posts.len(), 3);
        assert!(posts.iter().all(|p| p.user_id == i as u64 + 1));
    }
}

#[tokio::test]
async fn test_distinct_loaders_fetch_separately_in_same_tick() {
    let db = Database::seeded(3, 2);
    let scheduler = Scheduler::new();
    let posts = scheduler.loader(Arc::new(PostsByUser(db.clone())));
    let users = scheduler.loader(Arc::new(UsersById(db.clone())));

    let (p, u) = scheduler
        .run(async {
            futures::join!(
                join_all([1, 2, 3].map(|id| posts.load(id))),
                join_all([1, 2, 3].map(|id| users.load(id))),
            )
        })
        .await;

    assert_eq!(db.calls_for("posts_by_user").len(), 1);
    assert_eq!(db.calls_for("users_by_id").len(), 1);
    assert_eq!(scheduler.tick_count(), 1);
    assert!(p.iter().all(|r| r.as_ref().unwrap().len() == 2));
    assert_eq!(u[2].as_ref().unwrap()[0].name, "user-3");
}

#[tokio::test]
async fn test_duplicate_keys_are_queued_once() {
    let db = Database::seeded(2, 1);
    let scheduler = Scheduler::new();
    let posts = scheduler.loader(Arc::new(PostsByUser(db.clone())));

    let (a, b, c) = scheduler
        .run(async { futures::join!(posts.load(1), posts.load(1), posts.load(2)) })
        .await;

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(c.unwrap().len(), 1);
    assert_eq!(db.calls_for("posts_by_user"), vec![vec![1, 2]]);
}

#[tokio::test]
async fn test_absent_key_yields_empty_list() {
    let db = Database::seeded(1, 2);
    let scheduler = Scheduler::new();
    let posts = scheduler.loader(Arc::new(PostsByUser(db.clone())));

    let missing = scheduler.run(posts.load(404)).await.unwrap();
    assert!(missing.is_empty());
}

#[tokio::test]
async fn test_failure_is_shared_within_loader_and_isolated_from_others() {
    let db = Database::seeded(2, 2);
    db.fail_posts.store(true, Ordering::SeqCst);
    let scheduler = Scheduler::new();
    let posts = scheduler.loader(Arc::new(PostsByUser(db.clone())));
    let users = scheduler.loader(Arc::new(UsersById(db.clone())));

    let (p1, p2, u1) = scheduler
        .run(async { futures::join!(posts.load(1), posts.load(2), users.load(1)) })
        .await;

    for result in [p1, p2] {
        match result.unwrap_err() {
            Error::Fetch { loader, source } => {
                assert_eq!(loader.as_str(), "posts_by_user");
                assert!(source.to_string().contains("posts table locked"));
                let context = source.context().unwrap();
                assert_eq!(context.source.as_deref(), Some("posts"));
                assert_eq!(context.field_path.as_deref(), Some("posts.user_id"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(u1.unwrap()[0].id, 1);
    assert_eq!(db.calls_for("posts_by_user").len(), 1);
}

#[tokio::test]
async fn test_children_of_a_batch_are_batched_in_the_next_tick() {
    let db = Database::seeded(4, 2);
    let scheduler = Scheduler::new();
    let users = scheduler.loader(Arc::new(UsersById(db.clone())));
    let posts = scheduler.loader(Arc::new(PostsByUser(db.clone())));

    let per_user = scheduler
        .run(async {
            join_all((1..=4).map(|id| {
                let users = users.clone();
                let posts = posts.clone();
                async move {
                    let user = users.load(id).await?;
                    posts.load(user[0].id).await
                }
            }))
            .await
        })
        .await;

    assert!(per_user.iter().all(|r| r.as_ref().unwrap().len() == 2));
    assert_eq!(db.calls_for("users_by_id").len(), 1);
    assert_eq!(db.calls_for("posts_by_user").len(), 1);
    assert_eq!(scheduler.tick_count(), 2);
}

#[tokio::test]
async fn test_load_many_keeps_input_order_and_fills_absent_keys() {
    let db = Database::seeded(3, 2);
    let scheduler = Scheduler::new();
    let posts = scheduler.loader(Arc::new(PostsByUser(db.clone())));

    let grouped = scheduler
        .run(posts.load_many(vec![3, 99, 1, 3]))
        .await
        .unwrap();

    assert_eq!(grouped.len(), 4);
    assert!(grouped[0].iter().all(|p| p.user_id == 3));
    assert!(grouped[1].is_empty());
    assert!(grouped[2].iter().all(|p| p.user_id == 1));
    assert_eq!(grouped[0], grouped[3]);
    assert_eq!(db.calls_for("posts_by_user"), vec![vec![3, 99, 1]]);
}

#[tokio::test]
async fn test_runtime_named_loaders_of_one_type_fetch_separately() {
    let db = Database::seeded(2, 4);
    let scheduler = Scheduler::new();
    let even = scheduler.loader(Arc::new(ShardedPosts { db: db.clone(), shard: 0 }));
    let odd = scheduler.loader(Arc::new(ShardedPosts { db: db.clone(), shard: 1 }));
    assert_eq!(even.loader_id().as_str(), "posts_shard_0");

    let (e, o) = scheduler
        .run(async { futures::join!(even.load_many(vec![1, 2]), odd.load_many(vec![1, 2])) })
        .await;

    let (e, o) = (e.unwrap(), o.unwrap());
    assert!(e.iter().flatten().all(|p| p.id % 2 == 0));
    assert!(o.iter().flatten().all(|p| p.id % 2 == 1));
    assert_eq!(e.iter().chain(&o).map(Vec::len).sum::<usize>(), 8);
    assert_eq!(db.calls_for("posts_shard_0"), vec![vec![1, 2]]);
    assert_eq!(db.calls_for("posts_shard_1"), vec![vec![1, 2]]);
    assert_eq!(scheduler.tick_count(), 1);
}
