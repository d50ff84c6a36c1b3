//! Integration test: concurrent readers around a hot key's expiry.
//!
//! Many tasks read the same key at once. Without a herd window they all
//! miss together; with one, only a handful recompute.

use std::sync::Arc;

use bytes::Bytes;
use herdcache_herd::StampedeGuard;
use herdcache_integration_tests::IntegrationCache;
use herdcache_types::{CacheTimeout, HerdConfig};

const READERS: usize = 200;

/// Fire `READERS` concurrent reads of `key`.
async fn read_burst(guard: &Arc<StampedeGuard>, key: &str) -> Vec<Option<Bytes>> {
    let mut handles = Vec::with_capacity(READERS);
    for _ in 0..READERS {
        let guard = guard.clone();
        let key = key.to_string();
        handles.push(tokio::spawn(async move { guard.get(&key).await.unwrap() }));
    }

    let mut results = Vec::with_capacity(READERS);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

fn herd(herd_timeout: u64) -> HerdConfig {
    HerdConfig {
        herd_timeout,
        ..HerdConfig::default()
    }
}

/// Simulate one second per tick: every reader reads, then every reader that
/// missed recomputes and writes. Returns the recomputations in the first
/// tick that had any.
async fn recomputes_at_first_miss(cache: &IntegrationCache) -> usize {
    let guard = cache.guard();
    guard
        .set("hot", Bytes::from_static(b"v0"), CacheTimeout::Seconds(60))
        .await
        .unwrap();
    cache.advance(60);

    for _ in 0..120 {
        cache.advance(1);
        let misses = read_burst(guard, "hot")
            .await
            .iter()
            .filter(|r| r.is_none())
            .count();
        if misses > 0 {
            for _ in 0..misses {
                guard
                    .set("hot", Bytes::from_static(b"v1"), CacheTimeout::Seconds(60))
                    .await
                    .unwrap();
            }
            return misses;
        }
    }
    panic!("no reader ever missed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30000)]
async fn test_fresh_hot_key_never_misses() {
    let cache = IntegrationCache::with_config(3, herd(60));
    let guard = cache.guard();
    guard
        .set("hot", Bytes::from_static(b"v"), CacheTimeout::Seconds(60))
        .await
        .unwrap();

    cache.advance(60);
    let results = read_burst(guard, "hot").await;
    assert!(results.iter().all(|r| r.as_deref() == Some(&b"v"[..])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30000)]
async fn test_just_expired_few_readers_refresh() {
    let cache = IntegrationCache::with_config(3, herd(60));
    let guard = cache.guard();
    guard
        .set("hot", Bytes::from_static(b"v"), CacheTimeout::Seconds(60))
        .await
        .unwrap();

    // One second past expiry: each reader is stale with probability 2/60.
    cache.advance(61);
    let results = read_burst(guard, "hot").await;
    let misses = results.iter().filter(|r| r.is_none()).count();
    assert!(misses < READERS / 5, "too many readers refreshed: {misses}");

    // Everyone else keeps serving the old value.
    assert!(
        results
            .iter()
            .flatten()
            .all(|v| v.as_ref() == b"v")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30000)]
async fn test_past_herd_window_every_reader_misses() {
    let cache = IntegrationCache::with_config(3, herd(60));
    let guard = cache.guard();
    guard
        .set("hot", Bytes::from_static(b"v"), CacheTimeout::Seconds(60))
        .await
        .unwrap();

    cache.advance(60 + 60);
    let results = read_burst(guard, "hot").await;
    assert!(results.iter().all(Option::is_none));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30000)]
async fn test_herd_window_prevents_stampede() {
    let unguarded = IntegrationCache::with_config(3, herd(0));
    let stampede = recomputes_at_first_miss(&unguarded).await;
    assert_eq!(stampede, READERS, "with no window every reader recomputes");

    let guarded = IntegrationCache::with_config(3, herd(60));
    let spread = recomputes_at_first_miss(&guarded).await;
    assert!(spread < READERS / 8, "window should spread refreshes: {spread}");

    // After the refresh the key is fresh again for everyone.
    let results = read_burst(guarded.guard(), "hot").await;
    assert!(results.iter().all(|r| r.as_deref() == Some(&b"v1"[..])));
}
