//! Shared test harness for herdcache integration tests.
//!
//! Provides [`IntegrationCache`]: N in-memory nodes behind a
//! [`ShardedStore`], wrapped in a [`StampedeGuard`] driven by a manual
//! clock, with per-node failure injection and read counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use herdcache_herd::{ManualClock, StampedeGuard};
use herdcache_shard::ShardedStore;
use herdcache_store::{KvStore, MemoryStore, SetCondition, StoreError};
use herdcache_types::{HerdConfig, Overflow};

/// Epoch seconds the harness clock starts at.
pub const START: u64 = 1_700_000_000;

/// Virtual points per node.
pub const REPLICAS: u32 = 128;

// =========================================================================
// Flaky store
// =========================================================================

/// In-memory node that can be switched off and counts its reads.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
    reads: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until [`revive`](Self::revive).
    pub fn kill(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    pub fn revive(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    /// Single-key and batched reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of live keys held.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("node is down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.set(key, value, ttl, condition).await
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.check()?;
        self.inner.incr(key, delta).await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.scan(pattern).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.check()?;
        self.inner.ttl(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, StoreError> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_many(keys).await
    }
}

// =========================================================================
// Integration cache
// =========================================================================

/// A simulated N-node cache for integration tests.
pub struct IntegrationCache {
    backends: Vec<Arc<FlakyStore>>,
    store: Arc<ShardedStore>,
    guard: Arc<StampedeGuard>,
    clock: Arc<ManualClock>,
}

impl IntegrationCache {
    /// Create an N-node cache with the default herd settings.
    pub fn new(n: usize) -> Self {
        Self::with_config(n, HerdConfig::default())
    }

    /// Create an N-node cache with custom herd settings.
    pub fn with_config(n: usize, config: HerdConfig) -> Self {
        assert!(n >= 1, "need at least 1 node");

        let backends: Vec<Arc<FlakyStore>> =
            (0..n).map(|_| Arc::new(FlakyStore::new())).collect();
        let nodes = backends
            .iter()
            .enumerate()
            .map(|(i, b)| (node_name(i), b.clone() as Arc<dyn KvStore>));
        let store = Arc::new(
            ShardedStore::with_nodes(nodes, REPLICAS, Overflow::Clamp)
                .expect("distinct node names"),
        );

        let clock = Arc::new(ManualClock::new(START));
        let guard = Arc::new(
            StampedeGuard::new(store.clone(), config)
                .with_clock(clock.clone())
                .seed(0x5eed),
        );

        Self {
            backends,
            store,
            guard,
            clock,
        }
    }

    /// The stampede guard over all nodes.
    pub fn guard(&self) -> &Arc<StampedeGuard> {
        &self.guard
    }

    /// The sharded store under the guard.
    pub fn store(&self) -> &Arc<ShardedStore> {
        &self.store
    }

    /// Backend of node `i`.
    pub fn backend(&self, i: usize) -> &FlakyStore {
        &self.backends[i]
    }

    /// Number of nodes ever created (removed nodes keep their index).
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Move the guard's clock forward.
    pub fn advance(&self, secs: u64) {
        self.clock.advance(secs);
    }

    /// Index of the node `key` routes to.
    pub async fn owner(&self, key: &str) -> usize {
        let name = self.store.locate(key).await.expect("ring has nodes");
        node_index(&name)
    }

    /// Mark a node as down: its operations fail but it stays on the ring.
    pub fn kill_node(&self, i: usize) {
        self.backends[i].kill();
    }

    /// Bring a killed node back.
    pub fn revive_node(&self, i: usize) {
        self.backends[i].revive();
    }

    /// Add a fresh, empty node. Returns its index.
    pub async fn add_node(&mut self) -> usize {
        let idx = self.backends.len();
        let backend = Arc::new(FlakyStore::new());
        self.store
            .add_node(&node_name(idx), backend.clone())
            .await
            .expect("new node name");
        self.backends.push(backend);
        idx
    }

    /// Take node `i` off the ring. Its backend keeps whatever it held.
    pub async fn remove_node(&self, i: usize) {
        self.store
            .remove_node(&node_name(i))
            .await
            .expect("node is on the ring");
    }

    /// Put a removed node back on the ring with its old backend.
    pub async fn restore_node(&self, i: usize) {
        self.store
            .add_node(&node_name(i), self.backends[i].clone())
            .await
            .expect("node was removed");
    }
}

/// Ring name of node `i`.
pub fn node_name(i: usize) -> String {
    format!("node:{i}")
}

/// Inverse of [`node_name`].
pub fn node_index(name: &str) -> usize {
    name.trim_start_matches("node:")
        .parse()
        .expect("harness node name")
}

/// `n` distinct keys with a common prefix.
pub fn test_keys(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}-{i:04}")).collect()
}
