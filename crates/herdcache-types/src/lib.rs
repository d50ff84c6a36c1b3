//! Shared types for herdcache.
//!
//! This crate defines the small value types used across the workspace:
//! the ring position type ([`Digest`]), cache timeouts ([`CacheTimeout`]),
//! and the embeddable configuration sections ([`RingConfig`], [`HerdConfig`]).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

// ---------------------------------------------------------------------------
// Ring positions
// ---------------------------------------------------------------------------

/// A SHA-256 digest used as a position on the hash ring.
///
/// Ordering is byte-wise, which matches the lexicographic order of the
/// lowercase hex rendering (both are fixed-width, most significant first).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Hash arbitrary data with SHA-256.
    pub fn from_data(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Return the raw 32-byte representation.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// How long a cache entry should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheTimeout {
    /// Use the configured default timeout.
    #[default]
    Default,
    /// Never expire.
    Never,
    /// Expire after this many seconds. Zero or negative means "expire now".
    Seconds(i64),
}

impl CacheTimeout {
    /// Resolve against a default, returning `None` for entries that never expire.
    pub fn resolve(self, default_secs: u64) -> Option<i64> {
        match self {
            CacheTimeout::Default => Some(i64::try_from(default_secs).unwrap_or(i64::MAX)),
            CacheTimeout::Never => None,
            CacheTimeout::Seconds(secs) => Some(secs),
        }
    }
}

impl From<Duration> for CacheTimeout {
    fn from(d: Duration) -> Self {
        CacheTimeout::Seconds(i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
    }
}

impl From<i64> for CacheTimeout {
    fn from(secs: i64) -> Self {
        CacheTimeout::Seconds(secs)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What a lookup does when the key hashes past the last point on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    /// Stay on the last point. Matches placements made by existing deployments.
    #[default]
    Clamp,
    /// Wrap around to the first point.
    Wrap,
}

/// Hash ring parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Node identifiers, e.g. `redis://10.0.0.1:6379/0`.
    pub nodes: Vec<String>,
    /// Virtual points per node.
    pub replicas: u32,
    /// Behaviour past the last ring point.
    pub overflow: Overflow,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            replicas: 128,
            overflow: Overflow::Clamp,
        }
    }
}

/// Stampede mitigation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HerdConfig {
    /// Seconds after logical expiry during which readers are declared stale
    /// with linearly increasing probability.
    pub herd_timeout: u64,
    /// Timeout applied when a write asks for [`CacheTimeout::Default`].
    pub default_timeout: u64,
    /// Re-pack entries declared stale during `get_many` so other readers keep
    /// serving them while the caller recomputes.
    pub refresh_stale_on_batch_read: bool,
}

impl Default for HerdConfig {
    fn default() -> Self {
        Self {
            herd_timeout: 60,
            default_timeout: 300,
            refresh_stale_on_batch_read: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
