//! Redis key-value backend.

use std::time::Duration;

use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{KvStore, MAX_TTL, SetCondition};

/// Keys requested per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

/// Redis-backed store.
///
/// Wraps a [`ConnectionManager`], which multiplexes commands over one
/// connection and reconnects transparently. Cloning the manager is cheap, so
/// every call works on its own handle.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    url: String,
}

impl RedisStore {
    /// Connect to the server at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url, "connected to redis");
        Ok(Self {
            conn,
            url: url.to_string(),
        })
    }

    /// The URL this store was connected with.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Convert a TTL to whole milliseconds for `PX`, rounding sub-millisecond
/// TTLs up so they still expire rather than being rejected. TTLs beyond
/// [`MAX_TTL`] are clamped so Redis never sees an out-of-range expire time.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.min(MAX_TTL).as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

#[async_trait::async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        match condition {
            SetCondition::Always => {}
            SetCondition::IfAbsent => {
                cmd.arg("NX");
            }
            SetCondition::IfPresent => {
                cmd.arg("XX");
            }
        }

        let mut conn = self.conn.clone();
        // SET replies OK, or nil when NX/XX blocked the write.
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        debug!(key, size = value.len(), ?ttl, written = reply.is_some(), "SET");
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await?;
        debug!(key, removed, "DEL");
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        // -2: missing, -1: no expiry.
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;
        Ok(values.into_iter().map(|v| v.map(Bytes::from)).collect())
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Bytes)>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in &entries {
            pipe.cmd("SET").arg(key).arg(value.as_ref());
            if let Some(ttl) = ttl {
                pipe.arg("PX").arg(ttl_millis(ttl));
            }
            pipe.ignore();
        }

        let mut conn = self.conn.clone();
        let () = pipe.query_async(&mut conn).await?;
        debug!(count = entries.len(), ?ttl, "pipelined SET");
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(keys).await?;
        debug!(count = keys.len(), removed, "DEL batch");
        Ok(removed)
    }
}
