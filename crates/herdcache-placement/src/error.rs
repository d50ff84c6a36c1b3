//! Error types for ring membership changes.

/// Errors returned by [`HashRing`](crate::HashRing) mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    /// The node is not a member of the ring.
    #[error("node not found on ring: {0}")]
    NodeNotFound(String),

    /// The node is already a member of the ring.
    #[error("node already on ring: {0}")]
    DuplicateNode(String),
}
