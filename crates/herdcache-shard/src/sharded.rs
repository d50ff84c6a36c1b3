//! Routing a keyspace across several stores with a [`HashRing`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use herdcache_placement::{HashRing, RingError, hash_tag};
use herdcache_store::{KvStore, SetCondition, StoreError};
use herdcache_types::{Overflow, RingConfig};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Ring plus the store behind each node name.
struct Shards {
    ring: HashRing,
    stores: HashMap<String, Arc<dyn KvStore>>,
}

impl Shards {
    fn store_for(&self, key: &str) -> Result<Arc<dyn KvStore>, StoreError> {
        self.ring
            .get_node(hash_tag(key))
            .and_then(|node| self.stores.get(node))
            .cloned()
            .ok_or_else(|| StoreError::NoNode(key.to_string()))
    }

    /// Split `items` by owning node, preserving order within each group.
    fn group<T>(
        &self,
        items: impl IntoIterator<Item = T>,
        key: impl Fn(&T) -> &str,
    ) -> Result<Vec<(Arc<dyn KvStore>, Vec<T>)>, StoreError> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<(Arc<dyn KvStore>, Vec<T>)> = Vec::new();

        for item in items {
            let k = key(&item);
            let Some(node) = self.ring.get_node(hash_tag(k)) else {
                return Err(StoreError::NoNode(k.to_string()));
            };
            let slot = match index.get(node) {
                Some(&slot) => slot,
                None => {
                    let store = self
                        .stores
                        .get(node)
                        .cloned()
                        .ok_or_else(|| StoreError::NoNode(k.to_string()))?;
                    groups.push((store, Vec::new()));
                    index.insert(node, groups.len() - 1);
                    groups.len() - 1
                }
            };
            groups[slot].1.push(item);
        }

        Ok(groups)
    }
}

/// A [`KvStore`] that spreads keys over named node stores.
///
/// Each key is routed by its [hash tag](hash_tag), so `{user:1}:profile`
/// and `{user:1}:settings` land on the same node. Batched calls are split
/// into one call per node.
///
/// Lookups take the read lock only to pick a store and release it before any
/// I/O, so a slow node does not block membership changes.
pub struct ShardedStore {
    shards: RwLock<Shards>,
}

impl ShardedStore {
    /// Create a store with no nodes.
    pub fn new(replicas: u32, overflow: Overflow) -> Self {
        Self::from_ring(HashRing::new(replicas).with_overflow(overflow), HashMap::new())
    }

    /// Create a store routing over `nodes`, given as `(name, store)` pairs.
    pub fn with_nodes<I>(nodes: I, replicas: u32, overflow: Overflow) -> Result<Self, RingError>
    where
        I: IntoIterator<Item = (String, Arc<dyn KvStore>)>,
    {
        let mut ring = HashRing::new(replicas).with_overflow(overflow);
        let mut stores = HashMap::new();
        for (name, store) in nodes {
            ring.add_node(&name)?;
            stores.insert(name, store);
        }
        Ok(Self::from_ring(ring, stores))
    }

    /// Create a store for the nodes named in `config`, building each node's
    /// store with `connect`.
    pub async fn from_config<F, Fut, E>(config: &RingConfig, mut connect: F) -> Result<Self, E>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Arc<dyn KvStore>, E>>,
        E: From<RingError>,
    {
        let mut nodes = Vec::with_capacity(config.nodes.len());
        for name in &config.nodes {
            nodes.push((name.clone(), connect(name.clone()).await?));
        }
        Ok(Self::with_nodes(nodes, config.replicas, config.overflow)?)
    }

    fn from_ring(ring: HashRing, stores: HashMap<String, Arc<dyn KvStore>>) -> Self {
        Self {
            shards: RwLock::new(Shards { ring, stores }),
        }
    }

    /// Add a node. Keys it now owns are not migrated.
    pub async fn add_node(&self, name: &str, store: Arc<dyn KvStore>) -> Result<(), RingError> {
        let mut shards = self.shards.write().await;
        shards.ring.add_node(name)?;
        shards.stores.insert(name.to_string(), store);
        info!(node = name, nodes = shards.ring.node_count(), "node joined keyspace");
        Ok(())
    }

    /// Remove a node and return its store. Keys it held become misses.
    pub async fn remove_node(&self, name: &str) -> Result<Arc<dyn KvStore>, RingError> {
        let mut shards = self.shards.write().await;
        shards.ring.remove_node(name)?;
        let store = shards
            .stores
            .remove(name)
            .ok_or_else(|| RingError::NodeNotFound(name.to_string()))?;
        info!(node = name, nodes = shards.ring.node_count(), "node left keyspace");
        Ok(store)
    }

    /// Name of the node `key` routes to, or `None` with no nodes.
    pub async fn locate(&self, key: &str) -> Option<String> {
        let shards = self.shards.read().await;
        shards.ring.get_node(hash_tag(key)).map(str::to_string)
    }

    /// Member node names in insertion order.
    pub async fn nodes(&self) -> Vec<String> {
        let shards = self.shards.read().await;
        shards.ring.nodes().map(str::to_string).collect()
    }

    /// Return a clone of the current ring.
    pub async fn ring(&self) -> HashRing {
        self.shards.read().await.ring.clone()
    }

    async fn route(&self, key: &str) -> Result<Arc<dyn KvStore>, StoreError> {
        self.shards.read().await.store_for(key)
    }
}

#[async_trait::async_trait]
impl KvStore for ShardedStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.route(key).await?.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> Result<bool, StoreError> {
        self.route(key).await?.set(key, value, ttl, condition).await
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.route(key).await?.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.route(key).await?.exists(key).await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.route(key).await?.incr(key, delta).await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let stores: Vec<Arc<dyn KvStore>> =
            self.shards.read().await.stores.values().cloned().collect();

        let mut keys = Vec::new();
        for store in stores {
            keys.extend(store.scan(pattern).await?);
        }
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.route(key).await?.ttl(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, StoreError> {
        let groups = self
            .shards
            .read()
            .await
            .group(keys.iter().enumerate(), |(_, k)| k.as_str())?;

        let mut values = vec![None; keys.len()];
        for (store, members) in groups {
            let batch: Vec<String> = members.iter().map(|(_, k)| k.to_string()).collect();
            let found = store.get_many(&batch).await?;
            for ((i, _), value) in members.into_iter().zip(found) {
                values[i] = value;
            }
        }
        Ok(values)
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Bytes)>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let groups = self
            .shards
            .read()
            .await
            .group(entries, |(k, _)| k.as_str())?;

        debug!(nodes = groups.len(), "split batch write");
        for (store, batch) in groups {
            store.set_many(batch, ttl).await?;
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        let groups = self
            .shards
            .read()
            .await
            .group(keys.iter().cloned(), |k| k.as_str())?;

        let mut removed = 0;
        for (store, batch) in groups {
            removed += store.delete_many(&batch).await?;
        }
        Ok(removed)
    }
}
