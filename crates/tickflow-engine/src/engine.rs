//! Cycle driver for a graph.
//!
//! The [`Engine`] owns the root [`GraphInstance`], validates feeds, and runs
//! one evaluation cycle per call to [`Engine::run_cycle`]. A fault that no
//! consumer observes aborts the cycle, retracts everything that cycle
//! ticked, and halts the engine.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use tickflow_core::{BranchKey, CoreError, EngineTime, NodeId};

use crate::fault::EngineError;
use crate::graph::Graph;
use crate::instance::{CycleContext, GraphInstance, MapState};
use crate::router::BranchErrorRouter;
use crate::series::TsOutput;
use crate::value::Value;

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum nesting of map and scoped-capture evaluations. Default: 32.
    pub max_nesting_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_nesting_depth: 32,
        }
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub time: EngineTime,
    /// Node evaluations run, at every nesting level.
    pub evaluated: usize,
    /// Faults turned into error records.
    pub captured: usize,
}

/// Evaluates a graph cycle by cycle.
pub struct Engine {
    root: GraphInstance,
    config: EngineConfig,
    last: Option<EngineTime>,
    halted: Option<EngineTime>,
}

impl Engine {
    pub fn new(graph: Graph, config: EngineConfig) -> Self {
        Engine {
            root: GraphInstance::new(Arc::new(graph)),
            config,
            last: None,
            halted: None,
        }
    }

    pub fn graph(&self) -> &Graph {
        self.root.graph()
    }

    /// Time of the last cycle run, successful or not.
    pub fn time(&self) -> Option<EngineTime> {
        self.last
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Runs one cycle at `time`, ticking the named sources with `feeds`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Halted`] once an earlier cycle failed.
    /// - [`EngineError::NonMonotonicTime`] unless `time` is after the last
    ///   cycle.
    /// - [`CoreError::UnknownSource`] / [`CoreError::InvalidFeed`] for bad
    ///   feeds; nothing is evaluated in that case.
    /// - [`EngineError::UnobservedFault`] or [`EngineError::NestingTooDeep`]
    ///   when evaluation fails. The engine halts.
    pub fn run_cycle(&mut self, time: EngineTime, feeds: &[(&str, Value)]) -> Result<CycleReport, EngineError> {
        if let Some(at) = self.halted {
            return Err(EngineError::Halted { at });
        }
        if let Some(last) = self.last {
            if time <= last {
                return Err(EngineError::NonMonotonicTime { time, last });
            }
        }
        let feeds = self.resolve_feeds(feeds)?;
        self.last = Some(time);

        let mut ctx = CycleContext::new(time, self.config.max_nesting_depth);
        match self.root.evaluate(&mut ctx, &feeds, None) {
            Ok(_) => Ok(CycleReport {
                time,
                evaluated: ctx.evaluated,
                captured: ctx.captured,
            }),
            Err(err) => {
                let retracted = self.root.retract(time);
                self.halted = Some(time);
                error!(%time, retracted, error = %err, "cycle failed, engine halted");
                Err(err)
            }
        }
    }

    /// The root instance, for inspecting nested map and scope state.
    pub fn instance(&self) -> &GraphInstance {
        &self.root
    }

    /// Output storage of a root-level node.
    pub fn output(&self, node: NodeId) -> Option<&TsOutput> {
        self.root.output(node)
    }

    /// Value of a scalar root-level node if it ticked in the last cycle.
    pub fn ticked(&self, node: NodeId) -> Option<&Value> {
        let time = self.last?;
        self.root.output(node)?.as_scalar()?.ticked(time)
    }

    /// Entry `key` of a keyed root-level node if it ticked in the last cycle.
    pub fn ticked_entry(&self, node: NodeId, key: &BranchKey) -> Option<&Value> {
        let time = self.last?;
        self.root.output(node)?.as_keyed()?.get(key)?.ticked(time)
    }

    /// Branch state of a root-level map node.
    pub fn map_state(&self, node: NodeId) -> Option<&MapState> {
        self.root.map_state(node)
    }

    /// Per-branch error slots of a root-level map node.
    pub fn branch_errors(&self, node: NodeId) -> Option<&BranchErrorRouter> {
        self.root.map_state(node).map(MapState::router)
    }

    fn resolve_feeds(&self, feeds: &[(&str, Value)]) -> Result<HashMap<NodeId, Value>, CoreError> {
        let graph = self.root.graph();
        let mut resolved = HashMap::with_capacity(feeds.len());
        for (name, value) in feeds {
            let id = graph.source(name).ok_or_else(|| CoreError::UnknownSource {
                name: name.to_string(),
            })?;
            let ty = graph
                .node(id)
                .and_then(|spec| spec.output_type())
                .ok_or(CoreError::NodeNotFound { id })?;
            if !value.conforms_to(ty) {
                return Err(CoreError::InvalidFeed {
                    name: name.to_string(),
                    expected: ty.to_string(),
                    got: value.type_name().to_string(),
                });
            }
            resolved.insert(id, value.clone());
        }
        if !resolved.is_empty() {
            info!(graph = graph.name(), sources = resolved.len(), "feeds accepted");
        }
        Ok(resolved)
    }
}
