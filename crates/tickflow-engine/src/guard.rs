//! Node-boundary fault containment.
//!
//! [`NodeGuard`] runs exactly one node's evaluation step. The step either
//! produces a value, or faults; a fault becomes an [`ErrorRecord`] only when
//! a capture consumer observes the node, and escalates otherwise. The three
//! results are disjoint variants of [`GuardOutcome`], so the caller can
//! never confuse "no value this cycle" with "captured failure".
//!
//! # Trace construction
//!
//! Walking outward from the fault site, the guard records at most
//! `trace_back_depth` frames: the failing node first, then the enclosing
//! node evaluations (map and scoped-capture nodes), innermost first. Bound
//! input values are kept only when `capture_values` is set.

use smallvec::SmallVec;
use tracing::debug;

use tickflow_core::{EngineTime, NodeId, NodeSignature};

use crate::fault::EvalFault;
use crate::record::{CaptureOptions, ErrorRecord, FrameInput, TraceFrame};
use crate::value::Value;

/// Result of one guarded evaluation step.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome {
    /// The step completed; `None` means it chose not to tick.
    Produced(Option<Value>),
    /// The step faulted and an attached consumer turned it into data. The
    /// node's output stays unset for the cycle.
    Captured(ErrorRecord),
    /// The step faulted and nothing observes the node.
    Escalated(EvalFault),
}

/// Wraps a single node's evaluation step.
pub struct NodeGuard<'a> {
    node: NodeId,
    signature: &'a NodeSignature,
    inputs: &'a [FrameInput],
    time: EngineTime,
    /// Enclosing node-evaluation frames, outermost first.
    enclosing: &'a [TraceFrame],
    observation: Option<CaptureOptions>,
}

impl<'a> NodeGuard<'a> {
    /// Creates an unobserved guard with no enclosing frames.
    ///
    /// `inputs` lists every input of the node in declaration order with its
    /// bound value and whether it ticked this cycle.
    pub fn new(node: NodeId, signature: &'a NodeSignature, inputs: &'a [FrameInput], time: EngineTime) -> Self {
        NodeGuard {
            node,
            signature,
            inputs,
            time,
            enclosing: &[],
            observation: None,
        }
    }

    /// Sets the enclosing call context (outermost first).
    pub fn enclosed_by(mut self, frames: &'a [TraceFrame]) -> Self {
        self.enclosing = frames;
        self
    }

    /// Attaches the merged options of every consumer observing this node.
    /// `None` leaves the node unobserved.
    pub fn observed(mut self, observation: Option<CaptureOptions>) -> Self {
        self.observation = observation;
        self
    }

    /// Frames a record for this node could contain at most.
    pub fn available_frames(&self) -> usize {
        1 + self.enclosing.len()
    }

    /// Runs `step` behind the node boundary.
    pub fn run<F>(self, step: F) -> GuardOutcome
    where
        F: FnOnce() -> Result<Option<Value>, EvalFault>,
    {
        match step() {
            Ok(value) => GuardOutcome::Produced(value),
            Err(fault) => match self.observation {
                Some(options) => {
                    let record = self.capture(&fault, options);
                    debug!(
                        node = %self.node,
                        name = %self.signature.name,
                        time = %self.time,
                        frames = record.trace().len(),
                        "fault captured"
                    );
                    GuardOutcome::Captured(record)
                }
                None => GuardOutcome::Escalated(fault),
            },
        }
    }

    fn capture(&self, fault: &EvalFault, options: CaptureOptions) -> ErrorRecord {
        let site = TraceFrame::new(self.node, self.signature.name.clone(), self.inputs.iter().cloned().collect::<SmallVec<_>>());
        let trace = std::iter::once(&site)
            .chain(self.enclosing.iter().rev())
            .take(options.trace_back_depth)
            .map(|frame| {
                if options.capture_values {
                    frame.clone()
                } else {
                    frame.without_values()
                }
            })
            .collect();
        let activation_inputs = self
            .inputs
            .iter()
            .filter(|input| input.modified)
            .map(|input| input.name.clone())
            .collect();

        ErrorRecord::new(
            fault.to_string(),
            self.signature.clone(),
            activation_inputs,
            trace,
            options.capture_values,
            self.time,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use smallvec::smallvec;
    use tickflow_core::{ScalarType, TsType};

    fn div_signature() -> NodeSignature {
        let float = TsType::ts(ScalarType::Float);
        NodeSignature::new(
            "div",
            vec![("lhs".into(), float.clone()), ("rhs".into(), float.clone())],
            Some(float),
        )
    }

    fn inputs(lhs: f64, rhs: f64) -> Vec<FrameInput> {
        vec![
            FrameInput {
                name: "lhs".into(),
                modified: false,
                value: Some(Value::Float(lhs)),
            },
            FrameInput {
                name: "rhs".into(),
                modified: true,
                value: Some(Value::Float(rhs)),
            },
        ]
    }

    fn enclosing(count: usize) -> Vec<TraceFrame> {
        (0..count)
            .map(|i| {
                TraceFrame::new(
                    NodeId(100 + i as u32),
                    format!("outer{i}"),
                    smallvec![FrameInput {
                        name: "ts".into(),
                        modified: true,
                        value: Some(Value::Int(i as i64)),
                    }],
                )
            })
            .collect()
    }

    fn divide_by_zero() -> Result<Option<Value>, EvalFault> {
        Err(EvalFault::DivideByZero { node: NodeId(2) })
    }

    #[test]
    fn normal_path_returns_value_unchanged() {
        let sig = div_signature();
        let ins = inputs(1.0, 4.0);
        let outcome = NodeGuard::new(NodeId(2), &sig, &ins, EngineTime(1))
            .observed(Some(CaptureOptions::default()))
            .run(|| Ok(Some(Value::Float(0.25))));
        assert_eq!(outcome, GuardOutcome::Produced(Some(Value::Float(0.25))));
    }

    #[test]
    fn unobserved_fault_escalates() {
        let sig = div_signature();
        let ins = inputs(1.0, 0.0);
        let outcome = NodeGuard::new(NodeId(2), &sig, &ins, EngineTime(1)).run(divide_by_zero);
        assert_eq!(outcome, GuardOutcome::Escalated(EvalFault::DivideByZero { node: NodeId(2) }));
    }

    #[test]
    fn observed_fault_becomes_record() {
        let sig = div_signature();
        let ins = inputs(1.0, 0.0);
        let outcome = NodeGuard::new(NodeId(2), &sig, &ins, EngineTime(7))
            .observed(Some(CaptureOptions::default()))
            .run(divide_by_zero);

        let GuardOutcome::Captured(record) = outcome else {
            panic!("expected Captured");
        };
        assert!(record.message().contains("division by zero"));
        assert_eq!(record.node_signature(), &sig);
        assert_eq!(record.activation_inputs(), ["rhs".to_string()]);
        assert_eq!(record.timestamp(), EngineTime(7));
        assert_eq!(record.trace().len(), 1);
        assert_eq!(record.trace()[0].name, "div");
        assert!(!record.capture_values());
        assert!(!record.trace()[0].has_values());
    }

    #[test]
    fn values_are_kept_when_requested() {
        let sig = div_signature();
        let ins = inputs(1.0, 0.0);
        let outer = enclosing(1);
        let outcome = NodeGuard::new(NodeId(2), &sig, &ins, EngineTime(1))
            .enclosed_by(&outer)
            .observed(Some(CaptureOptions::new(2, true)))
            .run(divide_by_zero);

        let GuardOutcome::Captured(record) = outcome else {
            panic!("expected Captured");
        };
        assert!(record.capture_values());
        assert_eq!(record.trace()[0].to_string(), "div(lhs=1.0, rhs*=0.0)");
        assert_eq!(record.trace()[1].to_string(), "outer0(ts*=0)");
    }

    #[test]
    fn enclosing_frames_are_walked_innermost_first() {
        let sig = div_signature();
        let ins = inputs(1.0, 0.0);
        let outer = enclosing(3);
        let outcome = NodeGuard::new(NodeId(2), &sig, &ins, EngineTime(1))
            .enclosed_by(&outer)
            .observed(Some(CaptureOptions::new(3, false)))
            .run(divide_by_zero);

        let GuardOutcome::Captured(record) = outcome else {
            panic!("expected Captured");
        };
        let names: Vec<_> = record.trace().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["div", "outer2", "outer1"]);
    }

    proptest! {
        #[test]
        fn trace_length_is_min_of_depth_and_available(depth in 0usize..8, outer in 0usize..5) {
            let sig = div_signature();
            let ins = inputs(1.0, 0.0);
            let frames = enclosing(outer);
            let guard = NodeGuard::new(NodeId(2), &sig, &ins, EngineTime(1))
                .enclosed_by(&frames)
                .observed(Some(CaptureOptions::new(depth, false)));
            let available = guard.available_frames();
            match guard.run(divide_by_zero) {
                GuardOutcome::Captured(record) => {
                    prop_assert_eq!(record.trace().len(), depth.min(available));
                }
                other => prop_assert!(false, "expected Captured, got {:?}", other),
            }
        }
    }
}
