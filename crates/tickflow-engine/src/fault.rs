//! Evaluation faults and engine-level errors.
//!
//! [`EvalFault`] is raised by a node's computation body. Every fault carries
//! the [`NodeId`] of the node that raised it. Whether a fault becomes data
//! (an [`ErrorRecord`](crate::record::ErrorRecord)) or escalates is decided
//! by the node guard, never by the op itself.
//!
//! [`EngineError`] is what escapes an evaluation cycle.

use tickflow_core::{CoreError, EngineTime, NodeId};

/// A trap condition raised while evaluating one node.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalFault {
    #[error("integer overflow at node {node}")]
    IntegerOverflow { node: NodeId },

    #[error("division by zero at node {node}")]
    DivideByZero { node: NodeId },

    #[error("type mismatch at node {node}: expected {expected}, got {got}")]
    TypeMismatch {
        node: NodeId,
        expected: String,
        got: String,
    },

    #[error("missing value: node {node} input {input} has no value")]
    MissingValue { node: NodeId, input: usize },

    /// A deliberate failure raised by the node body.
    #[error("{message}")]
    Raised { node: NodeId, message: String },
}

impl EvalFault {
    /// The node that raised the fault.
    pub fn node(&self) -> NodeId {
        match self {
            EvalFault::IntegerOverflow { node }
            | EvalFault::DivideByZero { node }
            | EvalFault::TypeMismatch { node, .. }
            | EvalFault::MissingValue { node, .. }
            | EvalFault::Raised { node, .. } => *node,
        }
    }
}

/// Errors that abort an evaluation cycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// A node faulted and no capture consumer observes it, in its own graph
    /// or in any enclosing scope.
    #[error("unobserved fault in {name} (node {node}) at {time}: {fault}")]
    UnobservedFault {
        node: NodeId,
        name: String,
        time: EngineTime,
        fault: EvalFault,
    },

    /// An earlier cycle escalated a fault; the run does not continue.
    #[error("engine halted after an unobserved fault at {at}")]
    Halted { at: EngineTime },

    #[error("evaluation time {time} is not after the previous cycle at {last}")]
    NonMonotonicTime { time: EngineTime, last: EngineTime },

    #[error("nesting depth limit ({limit}) exceeded at node {node}")]
    NestingTooDeep { node: NodeId, limit: usize },

    #[error(transparent)]
    Core(#[from] CoreError),
}
