//! tickflow command-line driver.
//!
//! Provides the `tickflow` binary with subcommands that build small graphs,
//! run them cycle by cycle, and print what the capture operators publish:
//! `divide` (an exception tap on one node), `try-except` (a scoped capture
//! over a sub-graph) and `map` (per-branch error routing).

use std::process;

use clap::{Args, Parser, Subcommand};
use serde_json::json;

use tickflow_core::{BranchKey, CoreError, EngineTime, NodeId, ScalarType, TsType};
use tickflow_engine::{
    ArithOp, CaptureOptions, CaptureTarget, Engine, EngineConfig, EngineError, Graph, GraphBuilder, Op, Value,
};

/// Fault-isolating dataflow engine.
#[derive(Parser)]
#[command(name = "tickflow", about = "Run tickflow graphs and inspect captured faults")]
struct Cli {
    #[command(flatten)]
    capture: CaptureArgs,

    /// Print one JSON object per cycle instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Diagnostic depth of every capture operator the command attaches.
#[derive(Args)]
struct CaptureArgs {
    /// Frames kept per error record, walking outward from the failing node.
    #[arg(long, global = true, env = "TICKFLOW_TRACE_BACK_DEPTH", default_value_t = 1)]
    trace_back_depth: usize,

    /// Keep the input values bound at fault time.
    #[arg(long, global = true)]
    capture_values: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Divide `lhs` by each `rhs` in turn, one cycle per value.
    Divide {
        #[arg(long)]
        lhs: f64,

        #[arg(long, num_args = 1.., required = true, allow_negative_numbers = true)]
        rhs: Vec<f64>,

        /// Leave the divide node unobserved so faults escalate.
        #[arg(long)]
        no_tap: bool,
    },
    /// Same as `divide`, with the division wrapped in a scoped capture.
    TryExcept {
        #[arg(long)]
        lhs: f64,

        #[arg(long, num_args = 1.., required = true, allow_negative_numbers = true)]
        rhs: Vec<f64>,
    },
    /// Divide `lhs` by every entry, one branch per key, in a single cycle.
    Map {
        #[arg(long)]
        lhs: f64,

        /// Branch entries as KEY=VALUE.
        #[arg(long = "entry", num_args = 1.., required = true, value_parser = parse_entry)]
        entries: Vec<(String, f64)>,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let options = CaptureOptions::new(cli.capture.trace_back_depth, cli.capture.capture_values);
    tracing::debug!(
        trace_back_depth = options.trace_back_depth,
        capture_values = options.capture_values,
        "capture options"
    );

    let exit_code = match cli.command {
        Commands::Divide { lhs, rhs, no_tap } => run_divide(lhs, &rhs, (!no_tap).then_some(options), cli.json),
        Commands::TryExcept { lhs, rhs } => run_try_except(lhs, &rhs, options, cli.json),
        Commands::Map { lhs, entries } => run_map(lhs, &entries, options, cli.json),
    };
    process::exit(exit_code);
}

/// Execute the divide subcommand.
///
/// Returns exit code: 0 = every cycle ran (captured faults included),
/// 1 = the graph could not be built, 2 = a fault escalated.
fn run_divide(lhs: f64, rhs: &[f64], tap: Option<CaptureOptions>, as_json: bool) -> i32 {
    match divide_graph(tap) {
        Ok((graph, div, errors)) => run_series(graph, lhs, rhs, div, errors, as_json),
        Err(e) => {
            eprintln!("Error: failed to build graph: {}", e);
            1
        }
    }
}

/// Execute the try-except subcommand. Exit codes as for `divide`.
fn run_try_except(lhs: f64, rhs: &[f64], options: CaptureOptions, as_json: bool) -> i32 {
    let built = ratio_graph().and_then(|body| {
        let mut g = GraphBuilder::new("main");
        let l = g.source("lhs", float())?;
        let r = g.source("rhs", float())?;
        let wrapped = g.try_except(CaptureTarget::Graph(body), &[("lhs", l), ("rhs", r)], options)?;
        Ok((g.build()?, wrapped))
    });
    match built {
        Ok((graph, wrapped)) => run_series(graph, lhs, rhs, wrapped.output, Some(wrapped.exception), as_json),
        Err(e) => {
            eprintln!("Error: failed to build graph: {}", e);
            1
        }
    }
}

/// Execute the map subcommand. Exit codes as for `divide`.
fn run_map(lhs: f64, entries: &[(String, f64)], options: CaptureOptions, as_json: bool) -> i32 {
    let built = ratio_graph().and_then(|body| {
        let mut g = GraphBuilder::new("main");
        let values = g.source("values", TsType::keyed(float()))?;
        let l = g.source("lhs", float())?;
        let map = g.map(body, "rhs", &[("lhs", l), ("rhs", values)])?;
        let tap = g.exception_tap(map, options)?;
        Ok((g.build()?, map, tap))
    });
    let (graph, map, tap) = match built {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("Error: failed to build graph: {}", e);
            return 1;
        }
    };

    let mut engine = Engine::new(graph, EngineConfig::default());
    let dict = Value::Dict(
        entries
            .iter()
            .map(|(k, v)| (BranchKey::new(k.as_str()), Value::Float(*v)))
            .collect(),
    );
    let time = EngineTime::START;
    if let Err(e) = engine.run_cycle(time, &[("values", dict), ("lhs", Value::Float(lhs))]) {
        return report_failure(&e);
    }

    for (key, _) in entries {
        let key = BranchKey::new(key.as_str());
        let output = engine.ticked_entry(map, &key);
        let error = engine.ticked_entry(tap, &key).and_then(Value::as_error);
        if as_json {
            println!(
                "{}",
                json!({ "time": time, "branch": key, "output": output, "error": error })
            );
        } else if let Some(record) = error {
            println!("[{key}] {record}");
        } else if let Some(value) = output {
            println!("[{key}] {value}");
        }
    }
    0
}

/// Runs one cycle per `rhs` value and prints the output or the error.
fn run_series(graph: Graph, lhs: f64, rhs: &[f64], output: NodeId, errors: Option<NodeId>, as_json: bool) -> i32 {
    let mut engine = Engine::new(graph, EngineConfig::default());
    let mut time = EngineTime::START;

    for (i, value) in rhs.iter().enumerate() {
        let mut feeds = vec![("rhs", Value::Float(*value))];
        if i == 0 {
            feeds.push(("lhs", Value::Float(lhs)));
        }
        if let Err(e) = engine.run_cycle(time, &feeds) {
            return report_failure(&e);
        }

        let produced = engine.ticked(output);
        let error = errors.and_then(|tap| engine.ticked(tap)).and_then(Value::as_error);
        if as_json {
            println!("{}", json!({ "time": time, "output": produced, "error": error }));
        } else if let Some(record) = error {
            println!("{time} {record}");
        } else if let Some(value) = produced {
            println!("{time} {value}");
        }
        time = time.next();
    }
    0
}

fn report_failure(err: &EngineError) -> i32 {
    eprintln!("Error: {}", err);
    match err {
        EngineError::UnobservedFault { .. } | EngineError::Halted { .. } => 2,
        _ => 1,
    }
}

fn float() -> TsType {
    TsType::ts(ScalarType::Float)
}

/// main: div(lhs, rhs), optionally tapped.
fn divide_graph(tap: Option<CaptureOptions>) -> Result<(Graph, NodeId, Option<NodeId>), CoreError> {
    let mut g = GraphBuilder::new("main");
    let l = g.source("lhs", float())?;
    let r = g.source("rhs", float())?;
    let div = g.compute(Op::Arith(ArithOp::Div), &[("lhs", l), ("rhs", r)])?;
    let errors = match tap {
        Some(options) => Some(g.exception_tap(div, options)?),
        None => None,
    };
    Ok((g.build()?, div, errors))
}

/// ratio(lhs, rhs) -> lhs / rhs, the body wrapped or mapped by the other commands.
fn ratio_graph() -> Result<Graph, CoreError> {
    let mut body = GraphBuilder::new("ratio");
    let l = body.source("lhs", float())?;
    let r = body.source("rhs", float())?;
    let div = body.compute(Op::Arith(ArithOp::Div), &[("lhs", l), ("rhs", r)])?;
    body.set_output(div)?;
    body.build()
}

/// Parse a `KEY=VALUE` branch entry.
fn parse_entry(s: &str) -> Result<(String, f64), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid entry '{}', expected KEY=VALUE", s))?;
    let value = value
        .parse::<f64>()
        .map_err(|e| format!("invalid value in entry '{}': {}", s, e))?;
    Ok((key.to_string(), value))
}
