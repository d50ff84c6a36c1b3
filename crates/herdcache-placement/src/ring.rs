//! Consistent hashing ring implementation.

use std::collections::HashMap;
use std::sync::Arc;

use herdcache_types::{Digest, Overflow, RingConfig};
use tracing::debug;

use crate::error::RingError;

/// Consistent hashing ring mapping string keys to named nodes.
///
/// Each node is mapped to `replicas` virtual points. A key is owned by the
/// first point whose digest sorts strictly after the key's digest.
///
/// Mutations take `&mut self`; callers that share a ring across tasks put it
/// behind a lock and keep lookups on the read side.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Physical nodes in insertion order.
    nodes: Vec<Arc<str>>,
    /// Ring point -> physical node.
    ring: HashMap<Digest, Arc<str>>,
    /// Every key of `ring`, ascending.
    sorted_keys: Vec<Digest>,
    /// Virtual points per node.
    replicas: u32,
    overflow: Overflow,
}

impl HashRing {
    /// Create an empty ring.
    pub fn new(replicas: u32) -> Self {
        Self {
            nodes: Vec::new(),
            ring: HashMap::new(),
            sorted_keys: Vec::new(),
            replicas,
            overflow: Overflow::Clamp,
        }
    }

    /// Create a ring holding `nodes`.
    pub fn with_nodes<I, S>(nodes: I, replicas: u32) -> Result<Self, RingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ring = Self::new(replicas);
        for node in nodes {
            ring.add_node(node.as_ref())?;
        }
        Ok(ring)
    }

    /// Build a ring from its configuration section.
    pub fn from_config(config: &RingConfig) -> Result<Self, RingError> {
        Ok(Self::with_nodes(&config.nodes, config.replicas)?.with_overflow(config.overflow))
    }

    /// Set what lookups do past the last ring point.
    pub fn with_overflow(mut self, overflow: Overflow) -> Self {
        self.overflow = overflow;
        self
    }

    /// Add a node and its virtual points.
    pub fn add_node(&mut self, node: &str) -> Result<(), RingError> {
        if self.contains(node) {
            return Err(RingError::DuplicateNode(node.to_string()));
        }

        let name: Arc<str> = Arc::from(node);
        for i in 0..self.replicas {
            let point = point_digest(node, i);
            self.ring.insert(point, Arc::clone(&name));
            self.sorted_keys.push(point);
        }
        self.sorted_keys.sort_unstable();
        self.nodes.push(name);

        debug!(node, replicas = self.replicas, "added node to ring");
        Ok(())
    }

    /// Remove a node and its virtual points.
    pub fn remove_node(&mut self, node: &str) -> Result<(), RingError> {
        let Some(idx) = self.nodes.iter().position(|n| &**n == node) else {
            return Err(RingError::NodeNotFound(node.to_string()));
        };

        self.nodes.remove(idx);
        for i in 0..self.replicas {
            self.ring.remove(&point_digest(node, i));
        }
        let ring = &self.ring;
        self.sorted_keys.retain(|point| ring.contains_key(point));

        debug!(node, "removed node from ring");
        Ok(())
    }

    /// Return the node owning `key` and the index of its ring point.
    ///
    /// Returns `None` when the ring has no nodes.
    pub fn get_node_pos(&self, key: &str) -> Option<(&str, usize)> {
        let idx = self.position(key)?;
        let node: &str = &self.ring[&self.sorted_keys[idx]];
        Some((node, idx))
    }

    /// Return the node owning `key`, or `None` when the ring has no nodes.
    pub fn get_node(&self, key: &str) -> Option<&str> {
        self.get_node_pos(key).map(|(node, _)| node)
    }

    /// Walk the ring points from `key`'s position to the end of the ring.
    ///
    /// The walk does not wrap. An empty ring yields nothing.
    pub fn iter_nodes(&self, key: &str) -> Iter<'_> {
        let pos = self.position(key).unwrap_or(self.sorted_keys.len());
        Iter { ring: self, pos }
    }

    /// Whether `node` is a member.
    pub fn contains(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| &**n == node)
    }

    /// Member nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| &**n)
    }

    /// Return the number of physical nodes in the ring.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Return the total number of virtual points in the ring.
    pub fn point_count(&self) -> usize {
        self.sorted_keys.len()
    }

    /// Whether the ring has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Virtual points per node.
    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    /// Behaviour past the last ring point.
    pub fn overflow(&self) -> Overflow {
        self.overflow
    }

    fn position(&self, key: &str) -> Option<usize> {
        let len = self.sorted_keys.len();
        if len == 0 {
            return None;
        }

        let digest = Digest::from_data(key.as_bytes());
        let insertion = self.sorted_keys.partition_point(|point| *point <= digest);

        Some(match self.overflow {
            Overflow::Clamp => insertion.min(len - 1),
            Overflow::Wrap => insertion % len,
        })
    }
}

/// Iterator over `(point, node)` pairs returned by [`HashRing::iter_nodes`].
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    ring: &'a HashRing,
    pos: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (Digest, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let ring = self.ring;
        let point = *ring.sorted_keys.get(self.pos)?;
        self.pos += 1;
        let node: &'a str = &ring.ring[&point];
        Some((point, node))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.ring.sorted_keys.len().saturating_sub(self.pos);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

/// Compute a virtual point: `sha256("{node}:{index}")`.
fn point_digest(node: &str, index: u32) -> Digest {
    Digest::from_data(format!("{node}:{index}").as_bytes())
}
