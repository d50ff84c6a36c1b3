//! Stampede-guarded reads and writes over a [`KvStore`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use herdcache_store::{KvStore, MAX_TTL, SetCondition};
use herdcache_types::{CacheTimeout, HerdConfig};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::envelope::Envelope;
use crate::error::HerdError;

/// Wraps a [`KvStore`] so that entries near expiry are refreshed by a few
/// readers instead of all of them at once.
///
/// Writes store an [`Envelope`] with the logical expiry and extend the
/// physical TTL by `herd_timeout`. Reads past the logical expiry return
/// `None` (a miss) only when the reader is picked by the staleness test;
/// everyone else keeps getting the old value until the window closes.
///
/// The guard holds no per-key state. Several readers may be declared stale
/// at the same moment and recompute redundantly; that is accepted.
pub struct StampedeGuard {
    inner: Arc<dyn KvStore>,
    config: HerdConfig,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
}

impl StampedeGuard {
    /// Wrap `inner` using wall-clock time and an OS-seeded RNG.
    pub fn new(inner: Arc<dyn KvStore>, config: HerdConfig) -> Self {
        Self {
            inner,
            config,
            clock: Arc::new(SystemClock),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Replace the time source.
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self { clock, ..self }
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Return the configuration.
    pub fn config(&self) -> &HerdConfig {
        &self.config
    }

    /// Wrap `value` to expire `timeout` seconds from now (0 means the default timeout).
    pub fn pack(&self, value: Bytes, timeout: u64) -> Envelope {
        let timeout = if timeout == 0 {
            self.config.default_timeout
        } else {
            timeout
        };
        Envelope::wrap(value, self.clock.now().saturating_add(timeout))
    }

    /// Decode a stored value and decide whether this reader sees it as stale.
    ///
    /// Values without an envelope are returned unchanged and never stale.
    pub fn unpack(&self, raw: Bytes) -> (Bytes, bool) {
        let envelope = Envelope::decode(raw);
        let stale = {
            let mut rng = self.rng.lock().expect("rng lock poisoned");
            envelope.is_stale(self.clock.now(), self.config.herd_timeout, &mut *rng)
        };
        (envelope.into_value(), stale)
    }

    /// Store `value` under `key`.
    ///
    /// - [`CacheTimeout::Never`] stores the value plainly with no TTL.
    /// - A timeout of zero or less deletes the key.
    /// - Otherwise the value is enveloped and kept `herd_timeout` seconds
    ///   past its logical expiry.
    ///
    /// Returns whether anything was written (or deleted).
    pub async fn set(
        &self,
        key: &str,
        value: Bytes,
        timeout: CacheTimeout,
    ) -> Result<bool, HerdError> {
        self.set_with(key, value, timeout, SetCondition::Always).await
    }

    /// Store `value` only if `key` does not exist yet.
    ///
    /// An entry past its logical expiry but still inside the herd window
    /// counts as existing.
    pub async fn add(
        &self,
        key: &str,
        value: Bytes,
        timeout: CacheTimeout,
    ) -> Result<bool, HerdError> {
        self.set_with(key, value, timeout, SetCondition::IfAbsent).await
    }

    /// Store `value` under `key` with an explicit write condition.
    pub async fn set_with(
        &self,
        key: &str,
        value: Bytes,
        timeout: CacheTimeout,
        condition: SetCondition,
    ) -> Result<bool, HerdError> {
        let Some(timeout) = timeout.resolve(self.config.default_timeout) else {
            return Ok(self.inner.set(key, value, None, condition).await?);
        };

        if timeout <= 0 {
            // "Expire now" cannot be expressed as a future-dated envelope.
            return Ok(match condition {
                SetCondition::IfAbsent => !self.inner.exists(key).await?,
                _ => self.inner.delete(key).await? > 0,
            });
        }

        let timeout = timeout.unsigned_abs();
        let raw = self.pack(value, timeout).encode()?;
        let ttl = self.physical_ttl(timeout);
        Ok(self.inner.set(key, raw, Some(ttl), condition).await?)
    }

    /// Fetch `key`. Returns `None` on a miss or when this reader is declared stale.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, HerdError> {
        let Some(raw) = self.inner.get(key).await? else {
            return Ok(None);
        };

        let (value, stale) = self.unpack(raw);
        if stale {
            debug!(key, "entry declared stale");
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Fetch `key`, returning `default` on a miss or when declared stale.
    pub async fn get_or(&self, key: &str, default: Bytes) -> Result<Bytes, HerdError> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Fetch several keys. Only fresh hits appear in the result.
    ///
    /// With `refresh_stale_on_batch_read`, entries this call declared stale
    /// are re-packed with a `herd_timeout` grace period so concurrent readers
    /// keep serving the old value while the caller recomputes.
    pub async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Bytes>, HerdError> {
        let raws = self.inner.get_many(keys).await?;

        let mut found = HashMap::with_capacity(keys.len());
        let mut stale = Vec::new();
        for (key, raw) in keys.iter().zip(raws) {
            let Some(raw) = raw else {
                continue;
            };
            let (value, is_stale) = self.unpack(raw);
            if is_stale {
                stale.push((key.clone(), value));
            } else {
                found.insert(key.clone(), value);
            }
        }

        if !stale.is_empty() {
            debug!(count = stale.len(), "batch read declared entries stale");
            if self.config.refresh_stale_on_batch_read && self.config.herd_timeout > 0 {
                self.extend_stale(stale).await?;
            }
        }

        Ok(found)
    }

    /// Store several values with a shared timeout, following the rules of [`set`](Self::set).
    pub async fn set_many(
        &self,
        entries: Vec<(String, Bytes)>,
        timeout: CacheTimeout,
    ) -> Result<(), HerdError> {
        let Some(timeout) = timeout.resolve(self.config.default_timeout) else {
            return Ok(self.inner.set_many(entries, None).await?);
        };

        if timeout <= 0 {
            let keys: Vec<String> = entries.into_iter().map(|(k, _)| k).collect();
            self.inner.delete_many(&keys).await?;
            return Ok(());
        }

        let timeout = timeout.unsigned_abs();
        let packed = entries
            .into_iter()
            .map(|(key, value)| {
                Ok::<_, HerdError>((key, self.pack(value, timeout).encode()?))
            })
            .collect::<Result<Vec<_>, HerdError>>()?;
        self.inner
            .set_many(packed, Some(self.physical_ttl(timeout)))
            .await?;
        Ok(())
    }

    /// Re-store the current value of `key` with a new timeout.
    ///
    /// Returns `false` if the key is missing or this reader saw it as stale.
    pub async fn touch(&self, key: &str, timeout: CacheTimeout) -> Result<bool, HerdError> {
        let Some(value) = self.get(key).await? else {
            return Ok(false);
        };
        self.set(key, value, timeout).await?;
        Ok(true)
    }

    /// Delete `key`. Returns the number of keys removed.
    pub async fn delete(&self, key: &str) -> Result<u64, HerdError> {
        Ok(self.inner.delete(key).await?)
    }

    /// Delete several keys. Returns the number of keys removed.
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64, HerdError> {
        Ok(self.inner.delete_many(keys).await?)
    }

    /// Whether `key` is physically present, stale or not.
    pub async fn exists(&self, key: &str) -> Result<bool, HerdError> {
        Ok(self.inner.exists(key).await?)
    }

    /// Always fails: an enveloped value cannot be incremented in place.
    pub async fn incr(&self, _key: &str, _delta: i64) -> Result<i64, HerdError> {
        Err(HerdError::Unsupported("incr"))
    }

    /// Always fails: an enveloped value cannot be decremented in place.
    pub async fn decr(&self, _key: &str, _delta: i64) -> Result<i64, HerdError> {
        Err(HerdError::Unsupported("decr"))
    }

    fn physical_ttl(&self, timeout: u64) -> Duration {
        Duration::from_secs(timeout.saturating_add(self.config.herd_timeout)).min(MAX_TTL)
    }

    async fn extend_stale(&self, stale: Vec<(String, Bytes)>) -> Result<(), HerdError> {
        let grace = self.config.herd_timeout;
        let packed = stale
            .into_iter()
            .map(|(key, value)| {
                Ok::<_, HerdError>((key, self.pack(value, grace).encode()?))
            })
            .collect::<Result<Vec<_>, HerdError>>()?;

        // A value recomputed by another caller in the meantime may be
        // overwritten here; the window is one round trip.
        debug!(count = packed.len(), grace, "extending stale entries");
        self.inner
            .set_many(packed, Some(self.physical_ttl(grace)))
            .await?;
        Ok(())
    }
}
