//! Consistent hashing ring for deterministic key placement.
//!
//! This crate implements a consistent hash ring that maps cache keys to
//! named backend nodes. Membership changes only move the keys owned by the
//! node that joined or left.
//!
//! Each physical node gets `replicas` virtual points on the ring, placed at
//! `sha256("{node}:{i}")`. A key is owned by the first point after
//! `sha256(key)`. More points per node = more uniform distribution.

mod error;
mod ring;
mod tag;

pub use error::RingError;
pub use ring::{HashRing, Iter};
pub use tag::hash_tag;
