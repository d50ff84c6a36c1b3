//! Key-value store trait and backend implementations.
//!
//! This crate defines the [`KvStore`] trait that every herdcache layer reads
//! and writes through, along with two concrete backends:
//!
//! - [`MemoryStore`]: in-memory storage backed by a `RwLock<HashMap>`, with TTLs.
//! - [`RedisStore`]: a Redis server reached through a reconnecting connection manager.
//!
//! Layers such as sharding and stampede protection also implement
//! [`KvStore`], so they compose by wrapping one another.

mod error;
mod memory_store;
mod redis_store;
mod traits;

pub use error::StoreError;
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use traits::{KvStore, MAX_TTL, SetCondition};
