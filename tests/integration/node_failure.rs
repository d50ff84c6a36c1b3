//! Integration test: node failure.
//!
//! A node that stops answering surfaces as `ConnectionInterrupted` for the
//! keys it owns. Other nodes keep serving.

use bytes::Bytes;
use herdcache_herd::HerdError;
use herdcache_integration_tests::{IntegrationCache, test_keys};
use herdcache_store::StoreError;
use herdcache_types::CacheTimeout;

async fn populate(cache: &IntegrationCache, keys: &[String]) {
    for key in keys {
        cache
            .guard()
            .set(key, Bytes::from(key.clone()), CacheTimeout::Seconds(600))
            .await
            .unwrap();
    }
}

/// 3 nodes, kill node 1: its keys fail, the rest read fine, and reviving
/// it brings the data back.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_dead_node_fails_only_its_keys() {
    let cache = IntegrationCache::new(3);
    let keys = test_keys("obj", 90);
    populate(&cache, &keys).await;

    cache.kill_node(1);

    let mut failed = 0;
    for key in &keys {
        let result = cache.guard().get(key).await;
        if cache.owner(key).await == 1 {
            assert!(
                matches!(
                    result,
                    Err(HerdError::ConnectionInterrupted(StoreError::Unavailable(_)))
                ),
                "{key}: {result:?}"
            );
            failed += 1;
        } else {
            assert_eq!(result.unwrap(), Some(Bytes::from(key.clone())));
        }
    }
    assert!(failed > 0, "node 1 owned none of the keys");

    cache.revive_node(1);
    for key in &keys {
        assert!(cache.guard().get(key).await.unwrap().is_some());
    }
}

/// A batch touching a dead node fails as a whole.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_batch_read_with_dead_node_fails() {
    let cache = IntegrationCache::new(3);
    let keys = test_keys("obj", 60);
    populate(&cache, &keys).await;

    cache.kill_node(0);
    let err = cache.guard().get_many(&keys).await.unwrap_err();
    assert!(matches!(err, HerdError::ConnectionInterrupted(_)));
    assert!(err.to_string().contains("node is down"));
}

/// Writes to a dead node fail; writes to live nodes are unaffected.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_writes_during_outage() {
    let cache = IntegrationCache::new(2);
    cache.kill_node(0);

    let keys = test_keys("w", 40);
    for key in &keys {
        let result = cache
            .guard()
            .set(key, Bytes::from_static(b"v"), CacheTimeout::Default)
            .await;
        match cache.owner(key).await {
            0 => assert!(matches!(result, Err(HerdError::ConnectionInterrupted(_)))),
            _ => assert!(result.unwrap()),
        }
    }

    cache.revive_node(0);
    assert!(cache.backend(0).is_empty());
    assert!(!cache.backend(1).is_empty());
}

/// Reads served by a node are counted, so a failed node sees none.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_failed_reads_do_not_reach_backend() {
    let cache = IntegrationCache::new(2);
    let keys = test_keys("r", 20);
    populate(&cache, &keys).await;

    cache.kill_node(1);
    for key in &keys {
        let _ = cache.guard().get(key).await;
    }
    assert_eq!(cache.backend(1).reads(), 0);
    assert!(cache.backend(0).reads() > 0);
}
