//! Primary/replica read-write splitting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use herdcache_store::{KvStore, SetCondition, StoreError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

/// A [`KvStore`] that sends writes to a primary and spreads reads over replicas.
///
/// Replication itself is the backend's job; a read issued right after a
/// write may not observe it.
pub struct ReplicatedStore {
    primary: Arc<dyn KvStore>,
    replicas: Vec<Arc<dyn KvStore>>,
    rng: Mutex<StdRng>,
}

impl ReplicatedStore {
    /// Reads go to a random member of `replicas`, or to `primary` if there are none.
    pub fn new(primary: Arc<dyn KvStore>, replicas: Vec<Arc<dyn KvStore>>) -> Self {
        Self {
            primary,
            replicas,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Number of replicas.
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    fn reader(&self) -> Arc<dyn KvStore> {
        let mut rng = self.rng.lock().expect("rng lock poisoned");
        self.replicas
            .choose(&mut *rng)
            .unwrap_or(&self.primary)
            .clone()
    }
}

#[async_trait::async_trait]
impl KvStore for ReplicatedStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.reader().get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> Result<bool, StoreError> {
        self.primary.set(key, value, ttl, condition).await
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.primary.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.reader().exists(key).await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.primary.incr(key, delta).await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.reader().scan(pattern).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.reader().ttl(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, StoreError> {
        self.reader().get_many(keys).await
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Bytes)>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.primary.set_many(entries, ttl).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.primary.delete_many(keys).await
    }
}
