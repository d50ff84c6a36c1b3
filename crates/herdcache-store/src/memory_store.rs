//! In-memory key-value backend.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{KvStore, MAX_TTL, SetCondition};

/// In-memory store backed by a `RwLock<HashMap>`.
///
/// Useful for testing and for running without a Redis server. Expiry uses
/// the tokio clock, so tests can drive it with `tokio::time::pause` and
/// `tokio::time::advance`. Expired entries are invisible to reads and are
/// dropped on the next write.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

#[derive(Debug, Clone)]
struct Entry {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let map = self.entries.read().expect("lock poisoned");
        map.values().filter(|e| e.is_live(now)).count()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let map = self.entries.read().expect("lock poisoned");
        map.get(key).filter(|e| e.is_live(now)).cloned()
    }

    fn purge_expired(map: &mut HashMap<String, Entry>, now: Instant) {
        map.retain(|_, e| e.is_live(now));
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.read_live(key).map(|e| e.data))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut map = self.entries.write().expect("lock poisoned");
        Self::purge_expired(&mut map, now);

        let present = map.contains_key(key);
        let allowed = match condition {
            SetCondition::Always => true,
            SetCondition::IfAbsent => !present,
            SetCondition::IfPresent => present,
        };
        if !allowed {
            return Ok(false);
        }

        debug!(key, size = value.len(), ?ttl, "storing value in memory");
        map.insert(
            key.to_string(),
            Entry {
                data: value,
                expires_at: deadline(now, ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut map = self.entries.write().expect("lock poisoned");
        let removed = map.remove(key).is_some_and(|e| e.is_live(now));
        debug!(key, removed, "deleted key from memory");
        Ok(u64::from(removed))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.read_live(key).is_some())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut map = self.entries.write().expect("lock poisoned");
        Self::purge_expired(&mut map, now);

        let (current, expires_at) = match map.get(key) {
            Some(entry) => {
                let current = std::str::from_utf8(&entry.data)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| StoreError::NotAnInteger {
                        key: key.to_string(),
                    })?;
                (current, entry.expires_at)
            }
            None => (0, None),
        };

        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Overflow {
                key: key.to_string(),
            })?;

        // Like Redis INCRBY, an increment keeps the existing expiry.
        map.insert(
            key.to_string(),
            Entry {
                data: Bytes::from(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let map = self.entries.read().expect("lock poisoned");
        let mut keys: Vec<String> = map
            .iter()
            .filter(|(k, e)| e.is_live(now) && glob_match(pattern.as_bytes(), k.as_bytes()))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(self
            .read_live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, StoreError> {
        let now = Instant::now();
        let map = self.entries.read().expect("lock poisoned");
        Ok(keys
            .iter()
            .map(|k| map.get(k).filter(|e| e.is_live(now)).map(|e| e.data.clone()))
            .collect())
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Bytes)>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut map = self.entries.write().expect("lock poisoned");
        Self::purge_expired(&mut map, now);

        debug!(count = entries.len(), ?ttl, "storing batch in memory");
        for (key, data) in entries {
            map.insert(
                key,
                Entry {
                    data,
                    expires_at: deadline(now, ttl),
                },
            );
        }
        Ok(())
    }
}

/// Expiry instant for a TTL set at `now`. An unrepresentable instant means no expiry.
fn deadline(now: Instant, ttl: Option<Duration>) -> Option<Instant> {
    ttl.and_then(|ttl| now.checked_add(ttl.min(MAX_TTL)))
}

/// Match `text` against a glob `pattern` supporting `*`, `?` and `\` escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it is currently covering.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, t));
                p += 1;
                continue;
            }
            Some(b'?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some(b'\\') if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                p += 2;
                t += 1;
                continue;
            }
            Some(&c) if c != b'\\' && c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        // Mismatch: let the last star swallow one more byte.
        match star {
            Some((sp, st)) => {
                p = sp + 1;
                t = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
