//! Error types for stampede-guarded operations.

use herdcache_store::StoreError;

/// Errors returned by [`StampedeGuard`](crate::StampedeGuard).
#[derive(Debug, thiserror::Error)]
pub enum HerdError {
    /// The backing store failed. No retry has been attempted.
    #[error("connection interrupted: {0}")]
    ConnectionInterrupted(#[from] StoreError),

    /// The operation cannot work on enveloped values.
    #[error("{0} is not supported on herd-protected entries")]
    Unsupported(&'static str),

    /// An envelope could not be encoded.
    #[error("envelope encoding error: {0}")]
    Encode(#[from] postcard::Error),
}
