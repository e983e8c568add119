//! Runtime state of one instantiated graph template.
//!
//! A [`GraphInstance`] owns the outputs of every node of its template, the
//! error slots of observed nodes, and the nested instances of map branches
//! and scoped captures. [`GraphInstance::evaluate`] runs one cycle over the
//! template's topological order.
//!
//! # Where a fault goes
//!
//! Each node is evaluated behind a [`NodeGuard`]. The guard is observed
//! when a tap in the same graph targets the node; otherwise it inherits the
//! capture scope of the enclosing map or scoped-capture node, if any. So a
//! fault is routed to the innermost consumer:
//!
//! 1. a tap on the node itself (the node's error slot),
//! 2. a tap on an enclosing map node (that node's [`BranchErrorRouter`]),
//! 3. an enclosing scoped capture (the first record of the cycle wins),
//! 4. nothing: the fault escalates as [`EngineError::UnobservedFault`].

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::debug;

use tickflow_core::{BranchKey, CoreError, EngineTime, NodeId};

use crate::eval::eval_op;
use crate::fault::EngineError;
use crate::graph::{Graph, MapSpec, NodeKind, NodeSpec, TapSpec};
use crate::guard::{GuardOutcome, NodeGuard};
use crate::record::{CaptureOptions, ErrorRecord, FrameInput, TraceFrame};
use crate::router::BranchErrorRouter;
use crate::series::{KeyedOutput, ScalarOutput, TsOutput};
use crate::value::Value;

/// Per-cycle evaluation context shared across nesting levels.
#[derive(Debug)]
pub(crate) struct CycleContext {
    pub time: EngineTime,
    /// Enclosing node-evaluation frames, outermost first.
    pub frames: Vec<TraceFrame>,
    pub max_nesting_depth: usize,
    /// Guarded node evaluations run this cycle.
    pub evaluated: usize,
    /// Faults turned into records this cycle.
    pub captured: usize,
}

impl CycleContext {
    pub fn new(time: EngineTime, max_nesting_depth: usize) -> Self {
        CycleContext {
            time,
            frames: Vec::new(),
            max_nesting_depth,
            evaluated: 0,
            captured: 0,
        }
    }

    fn enter(&mut self, frame: TraceFrame) -> Result<(), EngineError> {
        if self.frames.len() >= self.max_nesting_depth {
            return Err(EngineError::NestingTooDeep {
                node: frame.node,
                limit: self.max_nesting_depth,
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    fn leave(&mut self) {
        self.frames.pop();
    }
}

/// Branches of one map node, each with its error slot.
#[derive(Debug, Default)]
pub struct MapState {
    branches: IndexMap<BranchKey, GraphInstance>,
    router: BranchErrorRouter,
}

impl MapState {
    pub fn branch(&self, key: &BranchKey) -> Option<&GraphInstance> {
        self.branches.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &BranchKey> {
        self.branches.keys()
    }

    pub fn router(&self) -> &BranchErrorRouter {
        &self.router
    }
}

#[derive(Debug)]
enum Nested {
    Map(MapState),
    Scope(Box<GraphInstance>),
}

/// Current values of the inputs bound to one node.
struct Bound {
    frame_inputs: SmallVec<[FrameInput; 4]>,
    values: Vec<Value>,
    any_ticked: bool,
}

/// One live instantiation of a [`Graph`].
#[derive(Debug)]
pub struct GraphInstance {
    graph: Arc<Graph>,
    outputs: HashMap<NodeId, TsOutput>,
    /// Captured records of nodes observed by a local tap.
    errors: HashMap<NodeId, ScalarOutput>,
    nested: HashMap<NodeId, Nested>,
}

impl GraphInstance {
    pub fn new(graph: Arc<Graph>) -> Self {
        let mut outputs = HashMap::new();
        let mut nested = HashMap::new();
        for &id in graph.order() {
            let Some(spec) = graph.node(id) else { continue };
            if let Some(ty) = spec.output_type() {
                outputs.insert(id, TsOutput::for_type(ty));
            }
            match &spec.kind {
                NodeKind::Map(_) => {
                    nested.insert(id, Nested::Map(MapState::default()));
                }
                NodeKind::Scoped(body) => {
                    nested.insert(id, Nested::Scope(Box::new(GraphInstance::new(Arc::clone(body)))));
                }
                _ => {}
            }
        }
        GraphInstance {
            graph,
            outputs,
            errors: HashMap::new(),
            nested,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn output(&self, id: NodeId) -> Option<&TsOutput> {
        self.outputs.get(&id)
    }

    /// Branch state of a map node.
    pub fn map_state(&self, id: NodeId) -> Option<&MapState> {
        match self.nested.get(&id) {
            Some(Nested::Map(state)) => Some(state),
            _ => None,
        }
    }

    /// Instance of a scoped capture's body.
    pub fn scope(&self, id: NodeId) -> Option<&GraphInstance> {
        match self.nested.get(&id) {
            Some(Nested::Scope(inner)) => Some(inner),
            _ => None,
        }
    }

    /// Value of the template's output node, if it ticked at `time`.
    pub fn output_ticked(&self, time: EngineTime) -> Option<&Value> {
        self.graph
            .output()
            .and_then(|id| self.outputs.get(&id))
            .and_then(TsOutput::as_scalar)
            .and_then(|out| out.ticked(time))
    }

    /// Runs one cycle.
    ///
    /// `feeds` holds the values ticking on source nodes. `scope` is the
    /// capture scope inherited from an enclosing node: faults of nodes with
    /// no local tap are captured at those options and the first such record
    /// is returned to the caller instead of escalating.
    pub(crate) fn evaluate(
        &mut self,
        ctx: &mut CycleContext,
        feeds: &HashMap<NodeId, Value>,
        scope: Option<CaptureOptions>,
    ) -> Result<Option<ErrorRecord>, EngineError> {
        let graph = Arc::clone(&self.graph);
        let mut first: Option<ErrorRecord> = None;

        for &id in graph.order() {
            let spec = graph.node(id).ok_or(CoreError::NodeNotFound { id })?;
            let observation = graph.observation(id);

            let escaped = match &spec.kind {
                NodeKind::Source => {
                    if let Some(value) = feeds.get(&id) {
                        self.feed_source(id, value, ctx.time);
                    }
                    None
                }
                NodeKind::Compute(op) => {
                    let Some(bound) = self.bind_inputs(spec, ctx.time) else { continue };
                    if !bound.any_ticked {
                        continue;
                    }
                    ctx.evaluated += 1;
                    let guard = NodeGuard::new(id, &spec.signature, &bound.frame_inputs, ctx.time)
                        .enclosed_by(&ctx.frames)
                        .observed(observation.or(scope));
                    match guard.run(|| eval_op(op, &bound.values, id)) {
                        GuardOutcome::Produced(Some(value)) => {
                            self.set_scalar(id, value, ctx.time);
                            None
                        }
                        GuardOutcome::Produced(None) => None,
                        GuardOutcome::Captured(record) => {
                            ctx.captured += 1;
                            self.settle(id, observation, record, ctx.time)
                        }
                        GuardOutcome::Escalated(fault) => {
                            return Err(EngineError::UnobservedFault {
                                node: id,
                                name: spec.signature.name.clone(),
                                time: ctx.time,
                                fault,
                            });
                        }
                    }
                }
                NodeKind::Map(map) => self.eval_map(ctx, id, spec, map, observation.or(scope))?,
                NodeKind::Scoped(_) => self.eval_scope(ctx, id, spec, observation.or(scope))?,
                NodeKind::Tap(tap) => {
                    if self.publish(id, tap, ctx.time) {
                        ctx.evaluated += 1;
                    }
                    None
                }
            };

            if first.is_none() {
                first = escaped;
            }
        }

        Ok(first)
    }

    /// Forgets every tick made at `time`, recursively.
    pub(crate) fn retract(&mut self, time: EngineTime) -> usize {
        let mut dropped = 0;
        for out in self.outputs.values_mut() {
            dropped += match out {
                TsOutput::Scalar(out) => usize::from(out.retract(time)),
                TsOutput::Keyed(out) => out.retract(time),
            };
        }
        for slot in self.errors.values_mut() {
            dropped += usize::from(slot.retract(time));
        }
        for nested in self.nested.values_mut() {
            dropped += match nested {
                Nested::Map(state) => {
                    state.router.retract(time)
                        + state
                            .branches
                            .values_mut()
                            .map(|branch| branch.retract(time))
                            .sum::<usize>()
                }
                Nested::Scope(inner) => inner.retract(time),
            };
        }
        dropped
    }

    /// Keeps a captured record in the node's own slot when a local tap
    /// observes it; otherwise hands it back for the enclosing scope.
    fn settle(
        &mut self,
        id: NodeId,
        observation: Option<CaptureOptions>,
        record: ErrorRecord,
        time: EngineTime,
    ) -> Option<ErrorRecord> {
        if observation.is_some() {
            self.errors
                .entry(id)
                .or_default()
                .set(Value::Error(Box::new(record)), time);
            None
        } else {
            Some(record)
        }
    }

    fn feed_source(&mut self, id: NodeId, value: &Value, time: EngineTime) {
        match self.outputs.get_mut(&id) {
            Some(TsOutput::Scalar(out)) => out.set(value.clone(), time),
            Some(TsOutput::Keyed(out)) => {
                if let Some(entries) = value.as_dict() {
                    sync_keyed(out, entries, time);
                }
            }
            None => {}
        }
    }

    fn set_scalar(&mut self, id: NodeId, value: Value, time: EngineTime) {
        if let Some(TsOutput::Scalar(out)) = self.outputs.get_mut(&id) {
            out.set(value, time);
        }
    }

    /// Binds every input of a node to its current value; a keyed input is
    /// bound as a dict snapshot. `None` when some input has never ticked.
    fn bind_inputs(&self, spec: &NodeSpec, time: EngineTime) -> Option<Bound> {
        let mut bound = Bound {
            frame_inputs: SmallVec::new(),
            values: Vec::with_capacity(spec.inputs.len()),
            any_ticked: false,
        };
        for ((name, _), producer) in spec.signature.args.iter().zip(&spec.inputs) {
            let out = self.outputs.get(producer)?;
            let value = out.value()?;
            let modified = out.modified_at(time);
            bound.any_ticked |= modified;
            bound.frame_inputs.push(FrameInput {
                name: name.clone(),
                modified,
                value: Some(value.clone()),
            });
            bound.values.push(value);
        }
        Some(bound)
    }

    /// Returns `true` once a source of this instance holds a value.
    fn source_valid(&self, id: NodeId) -> bool {
        self.outputs.get(&id).is_some_and(|out| match out {
            TsOutput::Scalar(out) => out.is_valid(),
            TsOutput::Keyed(out) => !out.is_empty(),
        })
    }

    /// Lifecycle manager and evaluator of a map node.
    fn eval_map(
        &mut self,
        ctx: &mut CycleContext,
        id: NodeId,
        spec: &NodeSpec,
        map: &MapSpec,
        branch_scope: Option<CaptureOptions>,
    ) -> Result<Option<ErrorRecord>, EngineError> {
        let time = ctx.time;
        let locally_observed = self.graph.observation(id).is_some();

        // Snapshot the inputs before touching branch state.
        let mut keyed: Option<Vec<(BranchKey, Option<Value>, bool)>> = None;
        let mut broadcast: Vec<(String, Option<Value>, bool)> = Vec::new();
        for ((name, _), producer) in spec.signature.args.iter().zip(&spec.inputs) {
            let out = self.outputs.get(producer).ok_or(CoreError::NodeNotFound { id: *producer })?;
            if *name == map.keyed_arg {
                let entries = out.as_keyed().ok_or_else(|| CoreError::GraphInconsistency {
                    reason: format!("keyed argument '{name}' of node {id} is not a keyed series"),
                })?;
                keyed = Some(
                    entries
                        .iter()
                        .map(|(key, entry)| (key.clone(), entry.value().cloned(), entry.modified_at(time)))
                        .collect(),
                );
            } else {
                broadcast.push((name.clone(), out.value(), out.modified_at(time)));
            }
        }
        let keyed = keyed.ok_or_else(|| CoreError::GraphInconsistency {
            reason: format!("map node {id} has no argument '{}'", map.keyed_arg),
        })?;

        let Some(Nested::Map(state)) = self.nested.get_mut(&id) else {
            return Err(CoreError::GraphInconsistency {
                reason: format!("map node {id} has no branch state"),
            }
            .into());
        };
        let Some(TsOutput::Keyed(output)) = self.outputs.get_mut(&id) else {
            return Err(CoreError::GraphInconsistency {
                reason: format!("map node {id} has no keyed output"),
            }
            .into());
        };

        let retired: Vec<BranchKey> = state
            .branches
            .keys()
            .filter(|key| !keyed.iter().any(|(live, _, _)| live == *key))
            .cloned()
            .collect();
        for key in retired {
            state.branches.shift_remove(&key);
            state.router.remove_branch(&key, time);
            output.remove_key(&key, time);
            debug!(map = %spec.signature.name, branch = %key, %time, "branch removed");
        }

        let mut first: Option<ErrorRecord> = None;
        for (key, value, ticked) in keyed {
            let is_new = !state.branches.contains_key(&key);
            if is_new {
                state
                    .branches
                    .insert(key.clone(), GraphInstance::new(Arc::clone(&map.body)));
                state.router.add_branch(key.clone(), time);
                output.insert_key(key.clone(), time);
                debug!(map = %spec.signature.name, branch = %key, %time, "branch added");
            }
            let Some(value) = value else { continue };
            let Some(branch) = state.branches.get_mut(&key) else { continue };

            let mut feeds = HashMap::new();
            let mut frame_inputs: SmallVec<[FrameInput; 4]> = SmallVec::new();
            for (name, _) in &spec.signature.args {
                let (arg_value, arg_ticked) = if *name == map.keyed_arg {
                    (Some(value.clone()), ticked || is_new)
                } else {
                    match broadcast.iter().find(|(arg, _, _)| arg == name) {
                        Some((_, v, t)) => (v.clone(), *t || is_new),
                        None => (None, false),
                    }
                };
                if let (Some(v), Some(source)) = (&arg_value, map.body.source(name)) {
                    if arg_ticked || !branch.source_valid(source) {
                        feeds.insert(source, v.clone());
                    }
                }
                frame_inputs.push(FrameInput {
                    name: name.clone(),
                    modified: arg_ticked,
                    value: arg_value,
                });
            }
            if feeds.is_empty() {
                continue;
            }

            ctx.enter(TraceFrame::new(id, spec.signature.name.clone(), frame_inputs))?;
            let result = branch.evaluate(ctx, &feeds, branch_scope);
            ctx.leave();

            if let Some(record) = result? {
                if locally_observed {
                    state.router.route(&key, &record, time)?;
                } else if first.is_none() {
                    first = Some(record.with_branch(key.clone()));
                }
            }
            if let Some(produced) = branch.output_ticked(time) {
                output.set(&key, produced.clone(), time);
            }
        }

        Ok(first)
    }

    /// Evaluates a scoped capture's body as one unit.
    fn eval_scope(
        &mut self,
        ctx: &mut CycleContext,
        id: NodeId,
        spec: &NodeSpec,
        scope: Option<CaptureOptions>,
    ) -> Result<Option<ErrorRecord>, EngineError> {
        let time = ctx.time;
        let Some(bound) = self.bind_inputs(spec, time) else {
            return Ok(None);
        };
        if !bound.any_ticked {
            return Ok(None);
        }
        let observation = self.graph.observation(id);

        let Some(Nested::Scope(inner)) = self.nested.get_mut(&id) else {
            return Err(CoreError::GraphInconsistency {
                reason: format!("scoped node {id} has no body instance"),
            }
            .into());
        };
        let body = Arc::clone(&inner.graph);
        let mut feeds = HashMap::new();
        for input in &bound.frame_inputs {
            if let (Some(value), Some(source)) = (&input.value, body.source(&input.name)) {
                if input.modified || !inner.source_valid(source) {
                    feeds.insert(source, value.clone());
                }
            }
        }

        ctx.enter(TraceFrame::new(id, spec.signature.name.clone(), bound.frame_inputs))?;
        let result = inner.evaluate(ctx, &feeds, scope);
        ctx.leave();
        let record = result?;

        let produced = body.output().and_then(|out| inner.outputs.get(&out));
        match (self.outputs.get_mut(&id), produced) {
            (Some(TsOutput::Scalar(out)), Some(TsOutput::Scalar(inner_out))) => {
                if let Some(value) = inner_out.ticked(time) {
                    out.set(value.clone(), time);
                }
            }
            (Some(TsOutput::Keyed(out)), Some(TsOutput::Keyed(inner_out))) => {
                mirror_keyed(out, inner_out, time);
            }
            _ => {}
        }
        Ok(record.and_then(|record| self.settle(id, observation, record, time)))
    }

    /// Publishes the target's records captured this cycle, projected onto
    /// the tap's options. Returns `true` if the tap ticked.
    fn publish(&mut self, id: NodeId, tap: &TapSpec, time: EngineTime) -> bool {
        match self.nested.get(&tap.target) {
            Some(Nested::Map(state)) => {
                let Some(TsOutput::Keyed(out)) = self.outputs.get_mut(&id) else {
                    return false;
                };
                let retired: Vec<BranchKey> = out
                    .keys()
                    .filter(|key| !state.router.contains(key))
                    .cloned()
                    .collect();
                for key in &retired {
                    out.remove_key(key, time);
                }
                for key in state.router.keys() {
                    out.insert_key(key.clone(), time);
                }
                let mut ticked = false;
                for (key, record) in state.router.faulted(time) {
                    out.set(key, Value::Error(Box::new(record.projected(tap.options))), time);
                    ticked = true;
                }
                ticked
            }
            _ => {
                let Some(record) = self
                    .errors
                    .get(&tap.target)
                    .and_then(|slot| slot.ticked(time))
                    .and_then(Value::as_error)
                    .map(|record| record.projected(tap.options))
                else {
                    return false;
                };
                match self.outputs.get_mut(&id) {
                    Some(TsOutput::Scalar(out)) => {
                        out.set(Value::Error(Box::new(record)), time);
                        true
                    }
                    _ => false,
                }
            }
        }
    }
}

/// Follows the key set of a scope body's keyed result and copies the
/// entries that ticked at `time`.
fn mirror_keyed(out: &mut KeyedOutput, inner: &KeyedOutput, time: EngineTime) {
    let retired: Vec<BranchKey> = out.keys().filter(|key| !inner.contains_key(*key)).cloned().collect();
    for key in &retired {
        out.remove_key(key, time);
    }
    for key in inner.keys() {
        out.insert_key(key.clone(), time);
    }
    for (key, value) in inner.ticked(time) {
        out.set(key, value.clone(), time);
    }
}

/// Applies a keyed snapshot: absent keys are dropped, new or changed
/// entries tick, unchanged entries stay quiescent.
fn sync_keyed(out: &mut KeyedOutput, entries: &IndexMap<BranchKey, Value>, time: EngineTime) {
    let retired: Vec<BranchKey> = out.keys().filter(|key| !entries.contains_key(*key)).cloned().collect();
    for key in &retired {
        out.remove_key(key, time);
    }
    for (key, value) in entries {
        out.insert_key(key.clone(), time);
        let changed = out.get(key).and_then(ScalarOutput::value) != Some(value);
        if changed {
            out.set(key, value.clone(), time);
        }
    }
}
