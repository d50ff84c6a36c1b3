//! Error types for key-value store operations.

/// Errors that can occur during key-value store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The Redis client reported an error (connection, protocol or server).
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The backend could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// An increment targeted a value that is not a decimal integer.
    #[error("value at {key} is not an integer")]
    NotAnInteger {
        /// The key holding the value.
        key: String,
    },

    /// An increment would overflow a 64-bit signed integer.
    #[error("increment on {key} would overflow")]
    Overflow {
        /// The key holding the value.
        key: String,
    },

    /// No node is configured to serve the key.
    #[error("no node available for key {0}")]
    NoNode(String),
}
