//! Structured, immutable records of captured node failures.
//!
//! An [`ErrorRecord`] is built exactly once, inside a
//! [`NodeGuard`](crate::guard::NodeGuard), when a node's evaluation step
//! faults and a capture consumer is attached. It is never mutated afterwards:
//! enrichment (tagging the branch key, projecting onto a tap's options)
//! always produces a new record.
//!
//! The textual rendering produced by the `Display` impls is for diagnostics
//! only; nothing inside the engine parses it.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use tickflow_core::{BranchKey, EngineTime, NodeId, NodeSignature};

use crate::value::Value;

/// Diagnostic depth of a capture consumer.
///
/// Fixed when the consumer (an exception tap or a scoped capture) is
/// constructed; several consumers with different options may observe the
/// same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOptions {
    /// Maximum number of node-evaluation frames recorded, walking outward
    /// from the failing node. Default: 1 (the failing node only).
    pub trace_back_depth: usize,
    /// Whether trace frames retain the input values bound at fault time.
    /// Default: false.
    pub capture_values: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        CaptureOptions {
            trace_back_depth: 1,
            capture_values: false,
        }
    }
}

impl CaptureOptions {
    pub fn new(trace_back_depth: usize, capture_values: bool) -> Self {
        CaptureOptions {
            trace_back_depth,
            capture_values,
        }
    }

    /// The least options that satisfy both `self` and `other`.
    ///
    /// Used when several consumers observe one node: the guard captures at
    /// the merged depth and each consumer projects back to its own options.
    pub fn merge(self, other: CaptureOptions) -> CaptureOptions {
        CaptureOptions {
            trace_back_depth: self.trace_back_depth.max(other.trace_back_depth),
            capture_values: self.capture_values || other.capture_values,
        }
    }
}

/// One input of a traced node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameInput {
    pub name: String,
    /// Whether this input ticked in the failing cycle.
    pub modified: bool,
    /// Bound value, present only when values are captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// A node-evaluation frame in an error trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceFrame {
    pub node: NodeId,
    pub name: String,
    pub inputs: SmallVec<[FrameInput; 4]>,
}

impl TraceFrame {
    pub fn new(node: NodeId, name: impl Into<String>, inputs: SmallVec<[FrameInput; 4]>) -> Self {
        TraceFrame {
            node,
            name: name.into(),
            inputs,
        }
    }

    /// Copy of this frame with every bound value dropped.
    pub fn without_values(&self) -> TraceFrame {
        TraceFrame {
            node: self.node,
            name: self.name.clone(),
            inputs: self
                .inputs
                .iter()
                .map(|input| FrameInput {
                    name: input.name.clone(),
                    modified: input.modified,
                    value: None,
                })
                .collect(),
        }
    }

    pub fn has_values(&self) -> bool {
        self.inputs.iter().any(|input| input.value.is_some())
    }
}

/// A captured node-evaluation failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    message: String,
    node_signature: NodeSignature,
    activation_inputs: Vec<String>,
    trace: Vec<TraceFrame>,
    capture_values: bool,
    timestamp: EngineTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<BranchKey>,
}

impl ErrorRecord {
    /// Builds a record. Only the node guard calls this.
    pub(crate) fn new(
        message: String,
        node_signature: NodeSignature,
        activation_inputs: Vec<String>,
        trace: Vec<TraceFrame>,
        capture_values: bool,
        timestamp: EngineTime,
    ) -> Self {
        ErrorRecord {
            message,
            node_signature,
            activation_inputs,
            trace,
            capture_values,
            timestamp,
            branch: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn node_signature(&self) -> &NodeSignature {
        &self.node_signature
    }

    /// Inputs that ticked in the cycle that scheduled the failing node.
    pub fn activation_inputs(&self) -> &[String] {
        &self.activation_inputs
    }

    /// Frames from the failure site outward.
    pub fn trace(&self) -> &[TraceFrame] {
        &self.trace
    }

    pub fn capture_values(&self) -> bool {
        self.capture_values
    }

    pub fn timestamp(&self) -> EngineTime {
        self.timestamp
    }

    /// Replication key of the failing branch, when the failure happened
    /// inside a map node.
    pub fn branch(&self) -> Option<&BranchKey> {
        self.branch.as_ref()
    }

    /// New record tagged with the branch it was routed for.
    pub(crate) fn with_branch(&self, key: BranchKey) -> ErrorRecord {
        ErrorRecord {
            branch: Some(key),
            ..self.clone()
        }
    }

    /// New record cut down to `options`: the trace is truncated to the
    /// requested depth and values are dropped unless requested.
    pub(crate) fn projected(&self, options: CaptureOptions) -> ErrorRecord {
        let capture_values = self.capture_values && options.capture_values;
        let trace = self
            .trace
            .iter()
            .take(options.trace_back_depth)
            .map(|frame| {
                if capture_values {
                    frame.clone()
                } else {
                    frame.without_values()
                }
            })
            .collect();
        ErrorRecord {
            trace,
            capture_values,
            ..self.clone()
        }
    }
}

impl fmt::Display for FrameInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.modified {
            f.write_str("*")?;
        }
        if let Some(value) = &self.value {
            write!(f, "={value}")?;
        }
        Ok(())
    }
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, input) in self.inputs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{input}")?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.node_signature)?;
        writeln!(f, "  error: {}", self.message)?;
        write!(f, "  time: {}", self.timestamp)?;
        if let Some(branch) = &self.branch {
            write!(f, ", branch: {branch}")?;
        }
        if !self.activation_inputs.is_empty() {
            write!(f, "\n  activated by: {}", self.activation_inputs.join(", "))?;
        }
        if !self.trace.is_empty() {
            f.write_str("\n  trace:")?;
            for frame in &self.trace {
                write!(f, "\n    {frame}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use tickflow_core::{ScalarType, TsType};

    fn input(name: &str, modified: bool, value: f64) -> FrameInput {
        FrameInput {
            name: name.into(),
            modified,
            value: Some(Value::Float(value)),
        }
    }

    fn sample() -> ErrorRecord {
        let float = TsType::ts(ScalarType::Float);
        let signature = NodeSignature::new(
            "div",
            vec![("lhs".into(), float.clone()), ("rhs".into(), float.clone())],
            Some(float),
        );
        let trace = vec![
            TraceFrame::new(NodeId(2), "div", smallvec![input("lhs", false, 1.0), input("rhs", true, 0.0)]),
            TraceFrame::new(NodeId(5), "try_except[ratio]", smallvec![input("rhs", true, 0.0)]),
        ];
        ErrorRecord::new(
            "division by zero at node 2".into(),
            signature,
            vec!["rhs".into()],
            trace,
            true,
            EngineTime(3),
        )
    }

    #[test]
    fn default_options() {
        let options = CaptureOptions::default();
        assert_eq!(options.trace_back_depth, 1);
        assert!(!options.capture_values);
    }

    #[test]
    fn merge_takes_the_widest_options() {
        let merged = CaptureOptions::new(1, true).merge(CaptureOptions::new(3, false));
        assert_eq!(merged, CaptureOptions::new(3, true));
    }

    #[test]
    fn render_with_values() {
        insta::assert_snapshot!(sample().to_string(), @r"
        div(lhs: TimeSeries<float>, rhs: TimeSeries<float>) -> TimeSeries<float>
          error: division by zero at node 2
          time: t=3
          activated by: rhs
          trace:
            div(lhs=1.0, rhs*=0.0)
            try_except[ratio](rhs*=0.0)
        ");
    }

    #[test]
    fn projection_truncates_and_strips_values() {
        let record = sample();
        let projected = record.projected(CaptureOptions::default());
        assert_eq!(projected.trace().len(), 1);
        assert!(!projected.capture_values());
        assert!(!projected.trace()[0].has_values());
        assert_eq!(projected.trace()[0].to_string(), "div(lhs, rhs*)");
        // The source record is untouched.
        assert_eq!(record.trace().len(), 2);
        assert!(record.trace()[0].has_values());
    }

    #[test]
    fn projection_cannot_add_values_that_were_not_captured() {
        let stripped = sample().projected(CaptureOptions::new(2, false));
        let again = stripped.projected(CaptureOptions::new(2, true));
        assert!(!again.capture_values());
        assert!(again.trace().iter().all(|frame| !frame.has_values()));
    }

    #[test]
    fn branch_tagging_copies() {
        let record = sample();
        let tagged = record.with_branch(BranchKey::from("X"));
        assert_eq!(tagged.branch(), Some(&BranchKey::from("X")));
        assert!(record.branch().is_none());
        assert!(tagged.to_string().contains("time: t=3, branch: X"));
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["message"], "division by zero at node 2");
        assert_eq!(json["node_signature"]["name"], "div");
        assert_eq!(json["timestamp"], 3);
        assert_eq!(json["trace"][0]["inputs"][1]["modified"], true);
        assert!(json.get("branch").is_none());
    }
}
