//! Core trait and types for key-value storage.

use std::time::Duration;

use bytes::Bytes;

use crate::error::StoreError;

/// Longest TTL a backend is asked to honor. Longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(u32::MAX as u64);

/// Precondition attached to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    /// Write unconditionally.
    #[default]
    Always,
    /// Write only if the key does not exist (`NX`).
    IfAbsent,
    /// Write only if the key already exists (`XX`).
    IfPresent,
}

/// Trait for the key-value operations herdcache needs from a backend.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Values are opaque [`Bytes`]; serialization happens above this layer.
///
/// The batched methods have sequential default implementations. Backends
/// with native batch commands override them.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Retrieve a value. Returns `None` if the key is missing or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Store a value, expiring after `ttl` (never, if `None`).
    ///
    /// Returns `false` when `condition` prevented the write.
    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> Result<bool, StoreError>;

    /// Delete a key. Returns the number of keys removed (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Add `delta` to the integer stored at `key` (missing keys count as 0).
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// List keys matching a glob pattern (`*`, `?`).
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Remaining time to live. `None` if the key is missing or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Retrieve several values. The result is aligned with `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, StoreError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Store several values with a shared `ttl`.
    async fn set_many(
        &self,
        entries: Vec<(String, Bytes)>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(&key, value, ttl, SetCondition::Always).await?;
        }
        Ok(())
    }

    /// Delete several keys. Returns the number of keys removed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut removed = 0;
        for key in keys {
            removed += self.delete(key).await?;
        }
        Ok(removed)
    }
}
