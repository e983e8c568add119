//! Operation vocabulary for compute nodes.
//!
//! Ops do not carry type parameters; their output type is derived from the
//! types of the series bound to their inputs (see [`Op::output_type`]).

use serde::{Deserialize, Serialize};

use tickflow_core::{ScalarType, TsType};

/// Binary arithmetic operators.
///
/// Integer arithmetic is checked (overflow traps); float division and
/// remainder trap on a zero divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Comparison operators. Always produce a `bool` series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Operation performed by a compute node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// `lhs <op> rhs` on two numeric series of the same type.
    Arith(ArithOp),
    /// `lhs <op> rhs`, producing `bool`.
    Compare(CmpOp),
    /// Arithmetic negation.
    Neg,
    /// Passes its input through unchanged.
    Identity,
    /// Faults with `message` every time it is evaluated.
    Raise { message: String },
    /// Extracts the message of a captured error as a `str` series.
    ErrorMessage,
}

impl Op {
    /// Name used in node signatures and trace frames.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Arith(ArithOp::Add) => "add",
            Op::Arith(ArithOp::Sub) => "sub",
            Op::Arith(ArithOp::Mul) => "mul",
            Op::Arith(ArithOp::Div) => "div",
            Op::Arith(ArithOp::Rem) => "rem",
            Op::Compare(CmpOp::Eq) => "eq",
            Op::Compare(CmpOp::Ne) => "ne",
            Op::Compare(CmpOp::Lt) => "lt",
            Op::Compare(CmpOp::Le) => "le",
            Op::Compare(CmpOp::Gt) => "gt",
            Op::Compare(CmpOp::Ge) => "ge",
            Op::Neg => "neg",
            Op::Identity => "identity",
            Op::Raise { .. } => "raise",
            Op::ErrorMessage => "error_message",
        }
    }

    /// Number of inputs the op consumes.
    pub fn arity(&self) -> usize {
        match self {
            Op::Arith(_) | Op::Compare(_) => 2,
            Op::Neg | Op::Identity | Op::Raise { .. } | Op::ErrorMessage => 1,
        }
    }

    /// Output type given the types bound to the inputs, or `None` when the
    /// inputs are not acceptable for this op.
    pub fn output_type(&self, args: &[TsType]) -> Option<TsType> {
        if args.len() != self.arity() || args.iter().any(TsType::is_keyed) {
            return None;
        }
        match self {
            Op::Arith(_) => {
                let numeric = matches!(
                    args[0],
                    TsType::TimeSeries(ScalarType::Int) | TsType::TimeSeries(ScalarType::Float)
                );
                (numeric && args[0] == args[1]).then(|| args[0].clone())
            }
            Op::Compare(_) => (args[0] == args[1]).then(|| TsType::ts(ScalarType::Bool)),
            Op::Neg => matches!(
                args[0],
                TsType::TimeSeries(ScalarType::Int) | TsType::TimeSeries(ScalarType::Float)
            )
            .then(|| args[0].clone()),
            Op::Identity | Op::Raise { .. } => Some(args[0].clone()),
            Op::ErrorMessage => {
                (args[0] == TsType::error()).then(|| TsType::ts(ScalarType::Str))
            }
        }
    }
}
