mod common;

use std::time::Duration;

use common::Harness;
use murmur::application::follows::FollowError;
use murmur::cache::{CacheKey, CacheStore};
use murmur::domain::types::UserId;

#[tokio::test]
async fn follow_then_unfollow_updates_following_set() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;

    let outcome = h.follows.follow(author, reader).await.expect("follow");
    assert!(outcome.created);
    assert_eq!(
        h.follows.following_set(reader).await.expect("set"),
        vec![author]
    );

    assert!(h.follows.unfollow(author, reader).await.expect("unfollow"));
    assert!(h.follows.following_set(reader).await.expect("set").is_empty());
}

#[tokio::test]
async fn follow_is_idempotent() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;

    assert!(h.follows.follow(author, reader).await.expect("first").created);
    assert!(!h.follows.follow(author, reader).await.expect("second").created);
    assert_eq!(
        h.follows.following_set(reader).await.expect("set"),
        vec![author]
    );
}

#[tokio::test]
async fn self_follow_is_rejected_and_leaves_set_unchanged() {
    let h = Harness::new(10);
    let user = h.user("narcissus").await;

    let err = h.follows.follow(user, user).await.expect_err("self follow");
    assert!(matches!(err, FollowError::InvalidEdge(id) if id == user));
    assert!(h.follows.following_set(user).await.expect("set").is_empty());
}

#[tokio::test]
async fn unknown_users_are_named_in_the_error() {
    let h = Harness::new(10);
    let known = h.user("known").await;
    let ghost = UserId(404);

    let err = h.follows.follow(ghost, known).await.expect_err("ghost author");
    assert!(matches!(err, FollowError::UnknownUser(id) if id == ghost));

    let err = h.follows.follow(known, ghost).await.expect_err("ghost follower");
    assert!(matches!(err, FollowError::UnknownUser(id) if id == ghost));
}

#[tokio::test]
async fn cached_set_reflects_later_follows() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let first = h.user("first").await;
    let second = h.user("second").await;

    h.follows.follow(first, reader).await.expect("follow first");
    // Warm the cached set, then change the graph.
    h.follows.following_set(reader).await.expect("warm");
    h.follows.follow(second, reader).await.expect("follow second");

    let mut set = h.follows.following_set(reader).await.expect("set");
    set.sort();
    assert_eq!(set, vec![first, second]);

    h.follows.unfollow(first, reader).await.expect("unfollow");
    assert_eq!(
        h.follows.following_set(reader).await.expect("set"),
        vec![second]
    );
}

#[tokio::test]
async fn cache_outage_does_not_block_follow_or_reads() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;

    h.cache.set_failing(true);
    let outcome = h.follows.follow(author, reader).await.expect("follow");
    assert!(outcome.created);
    assert_eq!(
        h.follows.following_set(reader).await.expect("set"),
        vec![author]
    );
}

#[tokio::test]
async fn unfollow_of_missing_edge_reports_nothing_removed() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;

    assert!(!h.follows.unfollow(author, reader).await.expect("unfollow"));
}

#[tokio::test]
async fn follow_during_slow_read_is_not_lost_from_cache() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;
    h.repos.delay_following_reads(Duration::from_millis(100));

    let (stale, followed) = tokio::join!(h.follows.following_set(reader), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.follows.follow(author, reader).await
    });
    assert!(stale.expect("read").is_empty());
    assert!(followed.expect("follow").created);

    // The stale read must not have been cached over the new edge.
    assert_eq!(
        h.cache
            .set_members(CacheKey::FollowingSet(reader))
            .await
            .expect("members"),
        None
    );
    assert_eq!(
        h.follows.following_set(reader).await.expect("set"),
        vec![author]
    );
    assert_eq!(
        h.cache
            .set_members(CacheKey::FollowingSet(reader))
            .await
            .expect("members"),
        Some(vec![author])
    );
}
