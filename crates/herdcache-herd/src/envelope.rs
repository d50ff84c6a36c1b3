//! Stored representation of herd-protected values.
//!
//! A wrapped value is encoded as a 4-byte magic prefix followed by a
//! postcard body holding the logical expiry and the payload. Anything that
//! does not carry the prefix, or does not decode cleanly, is treated as a
//! plain value written by something other than the guard.

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::HerdError;

/// Prefix marking an encoded envelope.
const MAGIC: [u8; 4] = *b"HRD\x01";

/// A cached value as read from or written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// A value written through the guard, with its logical expiry.
    Wrapped {
        /// The cached payload.
        value: Bytes,
        /// Logical expiry, in epoch seconds.
        expires_at: u64,
    },
    /// A value without herd metadata. Never considered stale.
    Plain(Bytes),
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    expires_at: u64,
    value: Vec<u8>,
}

impl Envelope {
    /// Wrap `value` with a logical expiry.
    pub fn wrap(value: Bytes, expires_at: u64) -> Self {
        Envelope::Wrapped { value, expires_at }
    }

    /// Encode for storage. Plain values are stored as-is.
    pub fn encode(&self) -> Result<Bytes, HerdError> {
        match self {
            Envelope::Plain(value) => Ok(value.clone()),
            Envelope::Wrapped { value, expires_at } => {
                let body = postcard::to_allocvec(&WireEnvelope {
                    expires_at: *expires_at,
                    value: value.to_vec(),
                })?;
                let mut buf = BytesMut::with_capacity(MAGIC.len() + body.len());
                buf.put_slice(&MAGIC);
                buf.put_slice(&body);
                Ok(buf.freeze())
            }
        }
    }

    /// Decode a stored value. Never fails: unrecognised input is [`Envelope::Plain`].
    pub fn decode(raw: Bytes) -> Self {
        let wire = raw.strip_prefix(&MAGIC).and_then(|body| {
            match postcard::take_from_bytes::<WireEnvelope>(body) {
                Ok((wire, rest)) if rest.is_empty() => Some(wire),
                _ => None,
            }
        });
        match wire {
            Some(wire) => Envelope::Wrapped {
                value: Bytes::from(wire.value),
                expires_at: wire.expires_at,
            },
            None => Envelope::Plain(raw),
        }
    }

    /// The cached payload.
    pub fn value(&self) -> &Bytes {
        match self {
            Envelope::Wrapped { value, .. } | Envelope::Plain(value) => value,
        }
    }

    /// Consume the envelope, returning the payload.
    pub fn into_value(self) -> Bytes {
        match self {
            Envelope::Wrapped { value, .. } | Envelope::Plain(value) => value,
        }
    }

    /// Logical expiry, if the value is wrapped.
    pub fn expires_at(&self) -> Option<u64> {
        match self {
            Envelope::Wrapped { expires_at, .. } => Some(*expires_at),
            Envelope::Plain(_) => None,
        }
    }

    /// Decide whether a reader at time `now` should treat this value as stale.
    ///
    /// Plain values and values before their logical expiry are never stale.
    pub fn is_stale<R: Rng + ?Sized>(&self, now: u64, herd_timeout: u64, rng: &mut R) -> bool {
        match self.expires_at() {
            Some(expires_at) if expires_at < now => {
                is_expired(now - expires_at, herd_timeout, rng)
            }
            _ => false,
        }
    }
}

/// Probabilistic staleness test for a value `elapsed` seconds past expiry.
///
/// Always stale once `elapsed >= herd_timeout`. Before that, a draw `r` from
/// `[1, herd_timeout]` declares the value stale when `elapsed + r >= herd_timeout`,
/// so the chance grows linearly with `elapsed`.
pub fn is_expired<R: Rng + ?Sized>(elapsed: u64, herd_timeout: u64, rng: &mut R) -> bool {
    if elapsed >= herd_timeout {
        return true;
    }
    elapsed + rng.random_range(1..=herd_timeout) >= herd_timeout
}
