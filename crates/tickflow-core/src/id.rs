//! Stable identifiers for graph entities.
//!
//! [`NodeId`] is a newtype over `u32` bridging to petgraph's `NodeIndex`.
//! [`BranchKey`] is the opaque, hashable key that identifies one replicated
//! branch of a map node.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Stable node identifier within one graph. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Key of one branch of a replicated (mapped) computation.
///
/// Keys are supplied by the keyed collection driving the map; the engine
/// treats them as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchKey(String);

impl BranchKey {
    /// Creates a key from anything string-like.
    pub fn new(key: impl Into<String>) -> Self {
        BranchKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BranchKey {
    fn from(key: &str) -> Self {
        BranchKey(key.to_string())
    }
}

impl From<String> for BranchKey {
    fn from(key: String) -> Self {
        BranchKey(key)
    }
}

// Bridge between NodeId and petgraph's NodeIndex<u32>.

impl From<NodeIndex<u32>> for NodeId {
    fn from(idx: NodeIndex<u32>) -> Self {
        NodeId(idx.index() as u32)
    }
}

impl From<NodeId> for NodeIndex<u32> {
    fn from(id: NodeId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}
