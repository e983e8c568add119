//! Fault isolation for reactive dataflow graphs.
//!
//! Nodes evaluate once per engine cycle, in topological order. A failing
//! node is contained at its own boundary and, when a consumer observes it,
//! turned into an [`ErrorRecord`] that flows through the graph as ordinary
//! time-series data.
//!
//! # Architecture
//!
//! - [`NodeGuard`] wraps one node's evaluation step and decides between
//!   producing, capturing and escalating.
//! - [`ErrorRecord`] is the immutable captured failure; [`CaptureOptions`]
//!   fix its trace depth and whether bound values are kept.
//! - [`BranchErrorRouter`] holds one error slot per live branch of a map
//!   node.
//! - [`GraphBuilder::exception_tap`] and [`GraphBuilder::try_except`] are the
//!   capture operators.
//! - [`Engine`] drives cycles over a [`Graph`] and halts on a fault nobody
//!   observes.
//!
//! # Usage
//!
//! ```ignore
//! let mut g = GraphBuilder::new("main");
//! let lhs = g.source("lhs", TsType::ts(ScalarType::Float))?;
//! let rhs = g.source("rhs", TsType::ts(ScalarType::Float))?;
//! let div = g.compute(Op::Arith(ArithOp::Div), &[("lhs", lhs), ("rhs", rhs)])?;
//! let errors = g.exception_tap(div, CaptureOptions::default())?;
//!
//! let mut engine = Engine::new(g.build()?, EngineConfig::default());
//! engine.run_cycle(EngineTime(1), &[("lhs", Value::Float(1.0)), ("rhs", Value::Float(0.0))])?;
//! let record = engine.ticked(errors).and_then(Value::as_error);
//! ```

pub mod engine;
pub mod eval;
pub mod fault;
pub mod graph;
pub mod guard;
pub mod instance;
pub mod ops;
pub mod record;
pub mod router;
pub mod series;
pub mod value;

pub use engine::{CycleReport, Engine, EngineConfig};
pub use fault::{EngineError, EvalFault};
pub use graph::{CaptureTarget, Graph, GraphBuilder, TryExcept};
pub use guard::{GuardOutcome, NodeGuard};
pub use instance::{GraphInstance, MapState};
pub use ops::{ArithOp, CmpOp, Op};
pub use record::{CaptureOptions, ErrorRecord, FrameInput, TraceFrame};
pub use router::BranchErrorRouter;
pub use series::{KeyedOutput, ScalarOutput, TsOutput};
pub use value::Value;
