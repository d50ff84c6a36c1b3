//! Integration test: rebalancing.
//!
//! Change ring membership under a populated cache and check that only the
//! keys owned by the joining or leaving node change hands.

use bytes::Bytes;
use herdcache_integration_tests::{IntegrationCache, test_keys};
use herdcache_types::CacheTimeout;

const KEYS: usize = 1000;

async fn populate(cache: &IntegrationCache, keys: &[String]) -> Vec<usize> {
    let entries = keys
        .iter()
        .map(|k| (k.clone(), Bytes::from(k.clone())))
        .collect();
    cache
        .guard()
        .set_many(entries, CacheTimeout::Seconds(600))
        .await
        .unwrap();

    let mut owners = Vec::with_capacity(keys.len());
    for key in keys {
        owners.push(cache.owner(key).await);
    }
    owners
}

/// 3 nodes, add a 4th: moved keys all go to the new node, roughly a
/// quarter of them move, and moved keys read as misses until rewritten.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_add_node_moves_keys_only_to_new_node() {
    let mut cache = IntegrationCache::new(3);
    let keys = test_keys("obj", KEYS);
    let before = populate(&cache, &keys).await;

    let new = cache.add_node().await;
    assert_eq!(cache.store().nodes().await.len(), 4);

    let mut moved = 0;
    for (key, &old) in keys.iter().zip(&before) {
        let now = cache.owner(key).await;
        let value = cache.guard().get(key).await.unwrap();
        if now == old {
            assert_eq!(value, Some(Bytes::from(key.clone())), "{key} should still hit");
        } else {
            assert_eq!(now, new, "{key} moved from {old} to an old node {now}");
            assert_eq!(value, None, "{key} now lives on an empty node");
            moved += 1;
        }
    }

    let share = moved as f64 / KEYS as f64;
    assert!((0.12..=0.40).contains(&share), "moved share {share:.3}");
}

/// 4 nodes, remove one: only its keys are lost; putting it back restores
/// every key because placement is deterministic.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_remove_and_restore_node() {
    let cache = IntegrationCache::new(4);
    let keys = test_keys("obj", KEYS);
    let before = populate(&cache, &keys).await;

    cache.remove_node(1).await;
    assert_eq!(cache.store().nodes().await, vec!["node:0", "node:2", "node:3"]);

    for (key, &old) in keys.iter().zip(&before) {
        let now = cache.owner(key).await;
        let value = cache.guard().get(key).await.unwrap();
        if old == 1 {
            assert_ne!(now, 1);
            assert_eq!(value, None, "{key} was on the removed node");
        } else {
            assert_eq!(now, old, "{key} should not move");
            assert!(value.is_some(), "{key} should still hit");
        }
    }

    cache.restore_node(1).await;
    for (key, &old) in keys.iter().zip(&before) {
        assert_eq!(cache.owner(key).await, old);
        assert_eq!(cache.guard().get(key).await.unwrap(), Some(Bytes::from(key.clone())));
    }
}

/// A removed node's keys stay in its backend but are no longer reachable.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_removed_node_keeps_data_unreachable() {
    let cache = IntegrationCache::new(3);
    let keys = test_keys("obj", 300);
    populate(&cache, &keys).await;

    let held = cache.backend(2).len();
    assert!(held > 0);
    cache.remove_node(2).await;
    assert_eq!(cache.backend(2).len(), held);

    let found = cache.guard().get_many(&keys).await.unwrap();
    assert_eq!(found.len(), 300 - held);
}
