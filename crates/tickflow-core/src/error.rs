//! Core error types for tickflow-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering graph
//! construction, lookup, and branch bookkeeping failures. Failures raised by
//! node bodies are not represented here; those are evaluation faults owned
//! by the engine.

use crate::id::{BranchKey, NodeId};
use thiserror::Error;

/// Core errors produced while building or addressing a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A node id was not found in the graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// Two sources with the same name were declared in one graph.
    #[error("duplicate source: '{name}'")]
    DuplicateSource { name: String },

    /// A value was fed to a source that does not exist.
    #[error("unknown source: '{name}'")]
    UnknownSource { name: String },

    /// A fed value does not match the declared type of its source.
    #[error("invalid feed for source '{name}': expected {expected}, got {got}")]
    InvalidFeed {
        name: String,
        expected: String,
        got: String,
    },

    /// An error record was routed to a branch that is not live.
    #[error("unknown branch: '{key}'")]
    UnknownBranch { key: BranchKey },

    /// A node's inputs do not line up with what it requires.
    #[error("invalid binding: {reason}")]
    InvalidBinding { reason: String },

    /// A nested graph was used without a declared output node.
    #[error("graph '{graph}' has no output node")]
    MissingOutput { graph: String },

    /// The dependency structure of the graph is inconsistent.
    #[error("graph inconsistency: {reason}")]
    GraphInconsistency { reason: String },
}
