//! Multi-node [`KvStore`](herdcache_store::KvStore) compositions.
//!
//! [`ShardedStore`] partitions the keyspace over named nodes with a
//! consistent hash ring. [`ReplicatedStore`] splits one node into a write
//! primary and read replicas. Both implement `KvStore`, so either can sit
//! under a stampede guard or inside the other.

mod replicated;
mod sharded;

pub use replicated::ReplicatedStore;
pub use sharded::ShardedStore;
