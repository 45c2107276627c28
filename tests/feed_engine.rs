mod common;

use std::time::Duration;

use common::{Harness, texts};
use murmur::application::feed::{FeedConfig, FeedError};
use murmur::application::pagination::PageRequest;
use murmur::domain::types::UserId;
use time::OffsetDateTime;
use time::macros::datetime;

/// Follow cursors from the first page to the last, collecting texts.
async fn walk(h: &Harness, reader: UserId, limit: u32) -> Vec<String> {
    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = h
            .feed
            .get_feed_with_token(reader, Some(limit), cursor.as_deref())
            .await
            .expect("page");
        seen.extend(page.items.iter().map(|item| item.text.clone()));
        match page.next_cursor {
            Some(next) => cursor = Some(next.encode()),
            None => break,
        }
    }
    seen
}

#[tokio::test]
async fn newest_publication_comes_first() {
    let h = Harness::new(50);
    let u1 = h.user("u1").await;
    let u2 = h.user("u2").await;
    h.follows.follow(u2, u1).await.expect("follow");

    h.publications.publish(u2, "hello").await.expect("hello");
    h.publications.publish(u2, "world").await.expect("world");
    h.deliver_all().await;

    let page = h
        .feed
        .get_feed_with_token(u1, None, None)
        .await
        .expect("feed");
    assert_eq!(texts(&page.items), vec!["world", "hello"]);
    assert!(page.next_cursor.is_none());
    assert!(!page.partial);
}

#[tokio::test]
async fn following_nobody_yields_empty_page() {
    let h = Harness::new(50);
    let loner = h.user("loner").await;

    let page = h
        .feed
        .get_feed_with_token(loner, None, None)
        .await
        .expect("feed");
    assert!(page.items.is_empty());
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn authors_interleave_by_time_with_ties_broken_by_id() {
    let h = Harness::new(50);
    let reader = h.user("reader").await;
    let a = h.user("a").await;
    let b = h.user("b").await;
    h.follows.follow(a, reader).await.expect("follow a");
    h.follows.follow(b, reader).await.expect("follow b");

    let noon = datetime!(2024-04-01 12:00:00 UTC);
    h.repos
        .insert_publication(a, "a-early", noon - time::Duration::minutes(5))
        .await;
    h.repos.insert_publication(b, "b-tie-low", noon).await;
    h.repos.insert_publication(a, "a-tie-high", noon).await;
    h.repos
        .insert_publication(b, "b-late", noon + time::Duration::minutes(5))
        .await;

    let page = h
        .feed
        .get_feed_with_token(reader, None, None)
        .await
        .expect("feed");
    assert_eq!(
        texts(&page.items),
        vec!["b-late", "a-tie-high", "b-tie-low", "a-early"]
    );
}

#[tokio::test]
async fn full_cache_serves_page_without_store_reads() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;
    h.follows.follow(author, reader).await.expect("follow");

    for n in 0..5 {
        h.publications
            .publish(author, &format!("post {n}"))
            .await
            .expect("publish");
    }
    h.deliver_all().await;
    let store_reads = h.repos.recent_queries();

    let page = h
        .feed
        .get_feed_with_token(reader, Some(3), None)
        .await
        .expect("feed");
    assert_eq!(texts(&page.items), vec!["post 4", "post 3", "post 2"]);
    assert!(page.next_cursor.is_some());
    assert_eq!(h.repos.recent_queries(), store_reads);
}

#[tokio::test]
async fn evicted_publication_is_still_reachable_through_the_store() {
    let limit = 3;
    let h = Harness::new(limit);
    let reader = h.user("reader").await;
    let author = h.user("author").await;
    h.follows.follow(author, reader).await.expect("follow");

    for n in 1..=limit + 1 {
        h.publications
            .publish(author, &format!("p{n}"))
            .await
            .expect("publish");
    }
    h.deliver_all().await;

    let cached = h
        .recent
        .candidates(author, None, 10)
        .await
        .expect("candidates")
        .expect("list");
    assert_eq!(cached.entries.len(), limit);
    assert!(!cached.complete);
    let store_reads = h.repos.recent_queries();

    let first = h
        .feed
        .get_feed_with_token(reader, Some(2), None)
        .await
        .expect("first page");
    assert_eq!(texts(&first.items), vec!["p4", "p3"]);
    let cursor = first.next_cursor.expect("more pages").encode();

    let second = h
        .feed
        .get_feed_with_token(reader, Some(2), Some(&cursor))
        .await
        .expect("second page");
    assert_eq!(texts(&second.items), vec!["p2", "p1"]);
    assert!(second.next_cursor.is_none());
    assert!(h.repos.recent_queries() > store_reads);
}

#[tokio::test]
async fn cursor_walk_visits_every_publication_once() {
    let h = Harness::new(4);
    let reader = h.user("reader").await;
    let mut authors = Vec::new();
    for name in ["a", "b", "c"] {
        let author = h.user(name).await;
        h.follows.follow(author, reader).await.expect("follow");
        authors.push(author);
    }

    let base = datetime!(2024-04-01 00:00:00 UTC);
    let mut expected = Vec::new();
    for step in 0..12_i64 {
        let author = authors[(step % 3) as usize];
        let text = format!("s{step}");
        // Pairs of publications share a timestamp to exercise id tie-breaks.
        h.repos
            .insert_publication(author, &text, base + time::Duration::seconds(step / 2))
            .await;
        expected.push(text);
    }
    expected.reverse();

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = h
            .feed
            .get_feed_with_token(reader, Some(5), cursor.as_deref())
            .await
            .expect("page");
        seen.extend(page.items.iter().map(|item| item.text.clone()));
        match page.next_cursor {
            Some(next) => cursor = Some(next.encode()),
            None => break,
        }
    }

    assert_eq!(seen, expected);
}

#[tokio::test]
async fn slow_author_is_skipped_and_page_marked_partial() {
    let config = FeedConfig {
        author_fetch_timeout: Duration::from_millis(20),
        ..FeedConfig::default()
    };
    let h = Harness::with_feed_config(10, config);
    let reader = h.user("reader").await;
    let fast = h.user("fast").await;
    let slow = h.user("slow").await;
    h.follows.follow(fast, reader).await.expect("follow fast");
    h.follows.follow(slow, reader).await.expect("follow slow");

    h.publications.publish(fast, "quick").await.expect("publish");
    h.publications.publish(slow, "sluggish").await.expect("publish");
    h.repos.slow_author(slow, Duration::from_millis(500));

    let page = h
        .feed
        .get_feed_with_token(reader, None, None)
        .await
        .expect("partial feed");
    assert!(page.partial);
    assert_eq!(texts(&page.items), vec!["quick"]);
}

#[tokio::test]
async fn every_author_failing_returns_empty_partial_page() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;
    h.follows.follow(author, reader).await.expect("follow");
    h.publications.publish(author, "hidden").await.expect("publish");
    h.repos.fail_author(author);

    let page = h
        .feed
        .get_feed_with_token(reader, None, None)
        .await
        .expect("degraded feed");
    assert!(page.items.is_empty());
    assert!(page.partial);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn deferred_publication_reaches_feed_after_pending_sweep() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;
    h.follows.follow(author, reader).await.expect("follow");

    for n in 0..3 {
        h.publications
            .publish(author, &format!("p{n}"))
            .await
            .expect("publish");
    }
    h.deliver_all().await;

    h.queue.set_failing(true);
    h.publications
        .publish(author, "deferred")
        .await
        .expect("publish");
    h.queue.set_failing(false);

    for n in 3..6 {
        h.publications
            .publish(author, &format!("p{n}"))
            .await
            .expect("publish");
    }
    h.deliver_all().await;

    let report = h
        .publications
        .redeliver_pending(OffsetDateTime::now_utc() + time::Duration::seconds(1), 100)
        .await
        .expect("sweep");
    assert_eq!(report.enqueued, 1);
    h.deliver_all().await;

    assert_eq!(
        walk(&h, reader, 2).await,
        vec!["p5", "p4", "p3", "deferred", "p2", "p1", "p0"]
    );
}

#[tokio::test]
async fn rebuilt_list_includes_publications_missed_while_evicted() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;
    h.follows.follow(author, reader).await.expect("follow");

    for text in ["p1", "p2"] {
        h.publications.publish(author, text).await.expect("publish");
    }
    h.deliver_all().await;
    h.forget_recent(author).await;

    h.queue.set_failing(true);
    h.publications
        .publish(author, "deferred")
        .await
        .expect("publish");
    h.queue.set_failing(false);
    for text in ["n1", "n2", "n3"] {
        h.publications.publish(author, text).await.expect("publish");
    }
    h.deliver_all().await;

    let store_reads = h.repos.recent_queries();
    assert_eq!(
        walk(&h, reader, 2).await,
        vec!["n3", "n2", "n1", "deferred", "p2", "p1"]
    );
    assert_eq!(h.repos.recent_queries(), store_reads);
}

#[tokio::test]
async fn complete_short_list_is_served_from_cache() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;
    h.follows.follow(author, reader).await.expect("follow");
    h.publications.publish(author, "only").await.expect("publish");
    h.deliver_all().await;
    let store_reads = h.repos.recent_queries();

    let page = h
        .feed
        .get_feed_with_token(reader, None, None)
        .await
        .expect("feed");
    assert_eq!(texts(&page.items), vec!["only"]);
    assert!(page.next_cursor.is_none());
    assert_eq!(h.repos.recent_queries(), store_reads);
}

#[tokio::test]
async fn hydration_failure_degrades_cache_only_page() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;
    h.follows.follow(author, reader).await.expect("follow");
    for text in ["one", "two"] {
        h.publications.publish(author, text).await.expect("publish");
    }
    h.deliver_all().await;

    h.repos.set_hydration_failing(true);
    let page = h
        .feed
        .get_feed_with_token(reader, None, None)
        .await
        .expect("degraded feed");
    assert!(page.items.is_empty());
    assert!(page.partial);
    assert!(page.next_cursor.is_none());

    h.repos.set_hydration_failing(false);
    let page = h
        .feed
        .get_feed_with_token(reader, None, None)
        .await
        .expect("feed");
    assert_eq!(texts(&page.items), vec!["two", "one"]);
    assert!(!page.partial);
}

#[tokio::test]
async fn hydration_failure_keeps_store_prefix_and_resumes_after_it() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let cached = h.user("cached").await;
    let uncached = h.user("uncached").await;
    h.follows.follow(cached, reader).await.expect("follow");
    h.follows.follow(uncached, reader).await.expect("follow");

    for text in ["a1", "a2", "a3"] {
        h.publications.publish(cached, text).await.expect("publish");
    }
    h.deliver_all().await;
    for text in ["b1", "b2"] {
        h.publications.publish(uncached, text).await.expect("publish");
    }
    h.queue.take().await;

    h.repos.set_hydration_failing(true);
    let page = h
        .feed
        .get_feed_with_token(reader, Some(3), None)
        .await
        .expect("degraded feed");
    assert_eq!(texts(&page.items), vec!["b2", "b1"]);
    assert!(page.partial);
    let cursor = page.next_cursor.expect("resume point").encode();

    h.repos.set_hydration_failing(false);
    let page = h
        .feed
        .get_feed_with_token(reader, Some(3), Some(&cursor))
        .await
        .expect("feed");
    assert_eq!(texts(&page.items), vec!["a3", "a2", "a1"]);
    assert!(!page.partial);
}

#[tokio::test]
async fn cache_outage_falls_back_to_the_store() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;
    h.follows.follow(author, reader).await.expect("follow");
    h.publications.publish(author, "one").await.expect("publish");
    h.publications.publish(author, "two").await.expect("publish");
    h.deliver_all().await;

    h.cache.set_failing(true);
    let page = h
        .feed
        .get_feed_with_token(reader, None, None)
        .await
        .expect("feed");
    assert_eq!(texts(&page.items), vec!["two", "one"]);
    assert!(!page.partial);
}

#[tokio::test]
async fn cached_key_without_stored_row_is_omitted() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;
    h.follows.follow(author, reader).await.expect("follow");

    let mut ids = Vec::new();
    for text in ["keep-1", "gone", "keep-2", "keep-3"] {
        ids.push(h.publications.publish(author, text).await.expect("publish").id);
    }
    h.deliver_all().await;
    h.repos.delete_publication(ids[1]).await;

    let page = h
        .feed
        .get_feed_with_token(reader, Some(3), None)
        .await
        .expect("feed");
    assert_eq!(texts(&page.items), vec!["keep-3", "keep-2"]);
}

#[tokio::test]
async fn malformed_cursor_is_rejected() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;

    let err = h
        .feed
        .get_feed_with_token(reader, None, Some("not-a-cursor"))
        .await
        .expect_err("bad cursor");
    assert!(matches!(err, FeedError::InvalidCursor(_)));
}

#[tokio::test]
async fn page_size_is_clamped() {
    let h = Harness::new(10);
    assert_eq!(h.feed.page_size(None), 20);
    assert_eq!(h.feed.page_size(Some(0)), 1);
    assert_eq!(h.feed.page_size(Some(5_000)), 100);

    let reader = h.user("reader").await;
    let page = h
        .feed
        .get_feed(reader, PageRequest::new(0, None))
        .await
        .expect("feed");
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn unfollowed_author_disappears_from_feed() {
    let h = Harness::new(10);
    let reader = h.user("reader").await;
    let author = h.user("author").await;
    h.follows.follow(author, reader).await.expect("follow");
    h.publications.publish(author, "bye").await.expect("publish");
    h.deliver_all().await;
    assert_eq!(
        h.feed
            .get_feed_with_token(reader, None, None)
            .await
            .expect("feed")
            .items
            .len(),
        1
    );

    h.follows.unfollow(author, reader).await.expect("unfollow");
    let page = h
        .feed
        .get_feed_with_token(reader, None, None)
        .await
        .expect("feed");
    assert!(page.items.is_empty());
}
