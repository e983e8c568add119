//! Graph templates and the builder that wires them.
//!
//! A [`Graph`] is an immutable template: typed nodes, their input bindings,
//! a topological evaluation order, and the capture consumers attached to
//! each node. Map and scoped-capture nodes hold nested templates behind an
//! `Arc`, instantiated once per branch or scope at run time.
//!
//! # Capture operators
//!
//! - [`GraphBuilder::exception_tap`] adds a node whose output is the error
//!   stream of its target. A scalar target yields `TimeSeries<error>`; a map
//!   target yields the keyed `Keyed<str, TimeSeries<error>>`.
//! - [`GraphBuilder::try_except`] wraps a sub-graph (or a single op) and
//!   returns its `output` and `exception` series together as [`TryExcept`].
//!
//! Attaching a consumer is what makes a node's faults become data. A node
//! nobody observes keeps the default fail-loud behaviour.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::stable_graph::StableGraph;
use petgraph::Directed;

use tickflow_core::{CoreError, NodeId, NodeSignature, TsType};

use crate::ops::Op;
use crate::record::CaptureOptions;

/// What a node does when evaluated.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Ticks with externally fed values.
    Source,
    /// Evaluates an op over its inputs.
    Compute(Op),
    /// Replicates a body graph per key of its keyed input.
    Map(MapSpec),
    /// Evaluates a body graph as one capture scope.
    Scoped(Arc<Graph>),
    /// Publishes the captured errors of another node.
    Tap(TapSpec),
}

/// Body and keyed argument of a map node.
#[derive(Debug, Clone)]
pub struct MapSpec {
    pub body: Arc<Graph>,
    /// Input whose keys drive the branch set; each branch sees only its
    /// key's value on this argument.
    pub keyed_arg: String,
}

/// Target and options of an exception tap.
#[derive(Debug, Clone, Copy)]
pub struct TapSpec {
    pub target: NodeId,
    pub options: CaptureOptions,
}

/// A node of a graph template.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub signature: NodeSignature,
    pub kind: NodeKind,
    /// Producers bound to the signature's args, in declaration order.
    pub inputs: Vec<NodeId>,
}

impl NodeSpec {
    /// Output type; every node kind declares one.
    pub fn output_type(&self) -> Option<&TsType> {
        self.signature.output.as_ref()
    }
}

/// Where [`GraphBuilder::try_except`] draws its scope.
#[derive(Debug, Clone)]
pub enum CaptureTarget {
    /// A single op: delegates to a plain exception tap.
    Node(Op),
    /// A multi-node sub-graph with a declared output.
    Graph(Graph),
}

/// Structured result of a scoped capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryExcept {
    /// The wrapped computation's result; quiescent on cycles without a value.
    pub output: NodeId,
    /// Error stream over every failure point inside the scope.
    pub exception: NodeId,
}

/// Immutable graph template.
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    nodes: StableGraph<NodeSpec, u16, Directed, u32>,
    order: Vec<NodeId>,
    sources: IndexMap<String, NodeId>,
    output: Option<NodeId>,
    /// Merged options of every tap attached to a node.
    observers: HashMap<NodeId, CaptureOptions>,
}

impl Graph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeSpec> {
        self.nodes.node_weight(id.into())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.node_count()
    }

    /// Evaluation order: producers before consumers, targets before taps.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn sources(&self) -> &IndexMap<String, NodeId> {
        &self.sources
    }

    pub fn source(&self, name: &str) -> Option<NodeId> {
        self.sources.get(name).copied()
    }

    pub fn output(&self) -> Option<NodeId> {
        self.output
    }

    pub fn output_type(&self) -> Option<&TsType> {
        self.output
            .and_then(|id| self.node(id))
            .and_then(NodeSpec::output_type)
    }

    /// Merged options of the taps attached directly to `id`, if any.
    pub fn observation(&self, id: NodeId) -> Option<CaptureOptions> {
        self.observers.get(&id).copied()
    }
}

/// Incrementally wires a [`Graph`].
///
/// Every node is added after its inputs, so the result is acyclic by
/// construction; [`build`](Self::build) still verifies it.
pub struct GraphBuilder {
    name: String,
    nodes: StableGraph<NodeSpec, u16, Directed, u32>,
    sources: IndexMap<String, NodeId>,
    output: Option<NodeId>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        GraphBuilder {
            name: name.into(),
            nodes: StableGraph::new(),
            sources: IndexMap::new(),
            output: None,
        }
    }

    /// Declares an externally fed input of type `ty`.
    pub fn source(&mut self, name: &str, ty: TsType) -> Result<NodeId, CoreError> {
        if self.sources.contains_key(name) {
            return Err(CoreError::DuplicateSource {
                name: name.to_string(),
            });
        }
        let signature = NodeSignature::new(name, Vec::new(), Some(ty));
        let id = self.add_node(signature, NodeKind::Source, Vec::new());
        self.sources.insert(name.to_string(), id);
        Ok(id)
    }

    /// Adds a compute node applying `op` to the named inputs.
    pub fn compute(&mut self, op: Op, args: &[(&str, NodeId)]) -> Result<NodeId, CoreError> {
        let typed = self.typed_args(args)?;
        let arg_types: Vec<TsType> = typed.iter().map(|(_, ty)| ty.clone()).collect();
        let output = op.output_type(&arg_types).ok_or_else(|| CoreError::InvalidBinding {
            reason: format!(
                "{} cannot take ({})",
                op.name(),
                arg_types
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        })?;
        let signature = NodeSignature::new(op.name(), typed, Some(output));
        let inputs = args.iter().map(|(_, id)| *id).collect();
        Ok(self.add_node(signature, NodeKind::Compute(op), inputs))
    }

    /// Replicates `body` once per key of the `keyed_arg` input.
    ///
    /// Every source of `body` must be bound by name in `args`. The keyed
    /// argument must be a keyed series whose element type matches the body
    /// source; the others are broadcast to every branch unchanged.
    pub fn map(&mut self, body: Graph, keyed_arg: &str, args: &[(&str, NodeId)]) -> Result<NodeId, CoreError> {
        let body_output = body.output_type().cloned().ok_or_else(|| CoreError::MissingOutput {
            graph: body.name().to_string(),
        })?;
        if body_output.is_keyed() {
            return Err(CoreError::InvalidBinding {
                reason: format!("map body '{}' must produce a scalar series, not {body_output}", body.name()),
            });
        }
        let typed = self.typed_args(args)?;
        bind_body(&body, &typed, Some(keyed_arg))?;

        let signature = NodeSignature::new(
            format!("map[{}]", body.name()),
            typed,
            Some(TsType::keyed(body_output)),
        );
        let inputs = args.iter().map(|(_, id)| *id).collect();
        let spec = MapSpec {
            body: Arc::new(body),
            keyed_arg: keyed_arg.to_string(),
        };
        Ok(self.add_node(signature, NodeKind::Map(spec), inputs))
    }

    /// Exposes the captured errors of `target` as a series.
    ///
    /// The tap ticks only on cycles where `target` faulted. Tapping a map
    /// node yields a keyed error stream with one entry per live branch.
    /// A scoped capture is one failure point whatever its result shape, so
    /// its errors are always a `TimeSeries<error>`; records raised in a
    /// branch carry their key. Several taps may observe the same node, each
    /// with its own options.
    pub fn exception_tap(&mut self, target: NodeId, options: CaptureOptions) -> Result<NodeId, CoreError> {
        let target_type = self.output_type_of(target)?;
        let errors = match self.nodes.node_weight(target.into()).map(|spec| &spec.kind) {
            Some(NodeKind::Scoped(_)) => TsType::error(),
            _ => target_type.error_stream(),
        };
        let signature = NodeSignature::new(
            "exception_tap",
            vec![("ts".to_string(), target_type.clone())],
            Some(errors),
        );
        Ok(self.add_node(signature, NodeKind::Tap(TapSpec { target, options }), vec![target]))
    }

    /// Wraps `target` so its output and captured errors come back together.
    ///
    /// A single op is added as an ordinary compute node with an exception
    /// tap on it; a sub-graph becomes one scope whose failure points all
    /// report into `exception`.
    pub fn try_except(
        &mut self,
        target: CaptureTarget,
        args: &[(&str, NodeId)],
        options: CaptureOptions,
    ) -> Result<TryExcept, CoreError> {
        let output = match target {
            CaptureTarget::Node(op) => self.compute(op, args)?,
            CaptureTarget::Graph(body) => {
                let body_output = body.output_type().cloned().ok_or_else(|| CoreError::MissingOutput {
                    graph: body.name().to_string(),
                })?;
                let typed = self.typed_args(args)?;
                bind_body(&body, &typed, None)?;
                let signature = NodeSignature::new(format!("try_except[{}]", body.name()), typed, Some(body_output));
                let inputs = args.iter().map(|(_, id)| *id).collect();
                self.add_node(signature, NodeKind::Scoped(Arc::new(body)), inputs)
            }
        };
        let exception = self.exception_tap(output, options)?;
        Ok(TryExcept { output, exception })
    }

    /// Declares the node whose output is the graph's result.
    pub fn set_output(&mut self, node: NodeId) -> Result<(), CoreError> {
        self.output_type_of(node)?;
        self.output = Some(node);
        Ok(())
    }

    /// Freezes the template, computing evaluation order and observers.
    pub fn build(self) -> Result<Graph, CoreError> {
        let order = petgraph::algo::toposort(&self.nodes, None)
            .map_err(|cycle| CoreError::GraphInconsistency {
                reason: format!("cycle through node {}", NodeId::from(cycle.node_id())),
            })?
            .into_iter()
            .map(NodeId::from)
            .collect();

        let mut observers: HashMap<NodeId, CaptureOptions> = HashMap::new();
        for idx in self.nodes.node_indices() {
            if let NodeKind::Tap(tap) = &self.nodes[idx].kind {
                observers
                    .entry(tap.target)
                    .and_modify(|merged| *merged = merged.merge(tap.options))
                    .or_insert(tap.options);
            }
        }

        Ok(Graph {
            name: self.name,
            nodes: self.nodes,
            order,
            sources: self.sources,
            output: self.output,
            observers,
        })
    }

    fn add_node(&mut self, signature: NodeSignature, kind: NodeKind, inputs: Vec<NodeId>) -> NodeId {
        let idx = self.nodes.add_node(NodeSpec {
            signature,
            kind,
            inputs: inputs.clone(),
        });
        for (port, producer) in inputs.into_iter().enumerate() {
            self.nodes.add_edge(producer.into(), idx, port as u16);
        }
        NodeId::from(idx)
    }

    fn output_type_of(&self, id: NodeId) -> Result<TsType, CoreError> {
        self.nodes
            .node_weight(id.into())
            .and_then(NodeSpec::output_type)
            .cloned()
            .ok_or(CoreError::NodeNotFound { id })
    }

    fn typed_args(&self, args: &[(&str, NodeId)]) -> Result<Vec<(String, TsType)>, CoreError> {
        args.iter()
            .map(|(name, id)| Ok((name.to_string(), self.output_type_of(*id)?)))
            .collect()
    }
}

/// Checks that `args` bind every source of `body` with a compatible type.
fn bind_body(body: &Graph, args: &[(String, TsType)], keyed_arg: Option<&str>) -> Result<(), CoreError> {
    if let Some(keyed) = keyed_arg {
        if !args.iter().any(|(name, _)| name == keyed) {
            return Err(CoreError::InvalidBinding {
                reason: format!("keyed argument '{keyed}' is not bound"),
            });
        }
    }
    for (name, source) in body.sources() {
        let expected = body
            .node(*source)
            .and_then(NodeSpec::output_type)
            .ok_or(CoreError::NodeNotFound { id: *source })?;
        let bound = args
            .iter()
            .find(|(arg, _)| arg == name)
            .map(|(_, ty)| ty)
            .ok_or_else(|| CoreError::InvalidBinding {
                reason: format!("source '{name}' of '{}' is not bound", body.name()),
            })?;
        let per_branch = if keyed_arg == Some(name.as_str()) {
            bound.element()
        } else {
            Some(bound)
        };
        if per_branch != Some(expected) {
            return Err(CoreError::InvalidBinding {
                reason: format!("source '{name}' of '{}' expects {expected}, bound to {bound}", body.name()),
            });
        }
    }
    for (name, _) in args {
        if body.source(name).is_none() {
            return Err(CoreError::InvalidBinding {
                reason: format!("'{}' has no source named '{name}'", body.name()),
            });
        }
    }
    Ok(())
}
