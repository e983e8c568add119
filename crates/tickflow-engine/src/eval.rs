//! Per-op evaluation logic.
//!
//! [`eval_op`] maps each [`Op`] to its runtime behaviour using checked
//! arithmetic and trap semantics. It never decides what happens to a fault;
//! it only reports one.

use tickflow_core::NodeId;

use crate::fault::EvalFault;
use crate::ops::{ArithOp, CmpOp, Op};
use crate::value::Value;

/// Evaluates `op` against its input values, in declaration order.
///
/// # Errors
///
/// Returns [`EvalFault`] for:
/// - Integer overflow (checked arithmetic)
/// - Division or remainder by zero
/// - Type mismatches at runtime
/// - [`Op::Raise`], unconditionally
pub fn eval_op(op: &Op, inputs: &[Value], node: NodeId) -> Result<Option<Value>, EvalFault> {
    match op {
        Op::Arith(arith_op) => {
            let lhs = get_input(inputs, 0, node)?;
            let rhs = get_input(inputs, 1, node)?;
            Ok(Some(eval_binary_arith(*arith_op, lhs, rhs, node)?))
        }

        Op::Compare(cmp_op) => {
            let lhs = get_input(inputs, 0, node)?;
            let rhs = get_input(inputs, 1, node)?;
            Ok(Some(eval_compare(*cmp_op, lhs, rhs, node)?))
        }

        Op::Neg => match get_input(inputs, 0, node)? {
            Value::Int(v) => v
                .checked_neg()
                .map(|v| Some(Value::Int(v)))
                .ok_or(EvalFault::IntegerOverflow { node }),
            Value::Float(v) => Ok(Some(Value::Float(-v))),
            other => Err(mismatch(node, "int or float", other.type_name())),
        },

        Op::Identity => Ok(Some(get_input(inputs, 0, node)?.clone())),

        Op::Raise { message } => Err(EvalFault::Raised {
            node,
            message: message.clone(),
        }),

        Op::ErrorMessage => match get_input(inputs, 0, node)? {
            Value::Error(record) => Ok(Some(Value::Str(record.message().to_string()))),
            other => Err(mismatch(node, "error", other.type_name())),
        },
    }
}

// ---------------------------------------------------------------------------
// Arithmetic evaluation
// ---------------------------------------------------------------------------

fn eval_binary_arith(op: ArithOp, lhs: &Value, rhs: &Value, node: NodeId) -> Result<Value, EvalFault> {
    match (lhs, rhs) {
        // Floats do not trap on overflow, only on a zero divisor.
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => {
                if *b == 0.0 {
                    return Err(EvalFault::DivideByZero { node });
                }
                a / b
            }
            ArithOp::Rem => {
                if *b == 0.0 {
                    return Err(EvalFault::DivideByZero { node });
                }
                a % b
            }
        })),
        (Value::Int(a), Value::Int(b)) => {
            if matches!(op, ArithOp::Div | ArithOp::Rem) && *b == 0 {
                return Err(EvalFault::DivideByZero { node });
            }
            let result = match op {
                ArithOp::Add => a.checked_add(*b),
                ArithOp::Sub => a.checked_sub(*b),
                ArithOp::Mul => a.checked_mul(*b),
                ArithOp::Div => a.checked_div(*b),
                ArithOp::Rem => a.checked_rem(*b),
            };
            result
                .map(Value::Int)
                .ok_or(EvalFault::IntegerOverflow { node })
        }
        _ => Err(mismatch(
            node,
            "matching numeric types",
            &format!("{} and {}", lhs.type_name(), rhs.type_name()),
        )),
    }
}

fn eval_compare(op: CmpOp, lhs: &Value, rhs: &Value, node: NodeId) -> Result<Value, EvalFault> {
    macro_rules! cmp {
        ($a:expr, $b:expr) => {
            match op {
                CmpOp::Eq => $a == $b,
                CmpOp::Ne => $a != $b,
                CmpOp::Lt => $a < $b,
                CmpOp::Le => $a <= $b,
                CmpOp::Gt => $a > $b,
                CmpOp::Ge => $a >= $b,
            }
        };
    }

    let result = match (lhs, rhs) {
        (Value::Bool(a), Value::Bool(b)) => cmp!(a, b),
        (Value::Int(a), Value::Int(b)) => cmp!(a, b),
        (Value::Float(a), Value::Float(b)) => cmp!(a, b),
        (Value::Str(a), Value::Str(b)) => cmp!(a, b),
        _ => {
            return Err(mismatch(
                node,
                "matching comparable types",
                &format!("{} and {}", lhs.type_name(), rhs.type_name()),
            ))
        }
    };

    Ok(Value::Bool(result))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn get_input(inputs: &[Value], index: usize, node: NodeId) -> Result<&Value, EvalFault> {
    inputs
        .get(index)
        .ok_or(EvalFault::MissingValue { node, input: index })
}

fn mismatch(node: NodeId, expected: &str, got: &str) -> EvalFault {
    EvalFault::TypeMismatch {
        node,
        expected: expected.to_string(),
        got: got.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: NodeId = NodeId(1);

    fn arith(op: ArithOp, lhs: Value, rhs: Value) -> Result<Option<Value>, EvalFault> {
        eval_op(&Op::Arith(op), &[lhs, rhs], NODE)
    }

    #[test]
    fn float_division() {
        let out = arith(ArithOp::Div, Value::Float(1.0), Value::Float(4.0)).unwrap();
        assert_eq!(out, Some(Value::Float(0.25)));
    }

    #[test]
    fn float_divide_by_zero_traps() {
        let err = arith(ArithOp::Div, Value::Float(1.0), Value::Float(0.0)).unwrap_err();
        assert_eq!(err, EvalFault::DivideByZero { node: NODE });
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn int_remainder_by_zero_traps() {
        let err = arith(ArithOp::Rem, Value::Int(7), Value::Int(0)).unwrap_err();
        assert_eq!(err, EvalFault::DivideByZero { node: NODE });
    }

    #[test]
    fn int_overflow_traps() {
        let err = arith(ArithOp::Mul, Value::Int(i64::MAX), Value::Int(2)).unwrap_err();
        assert_eq!(err, EvalFault::IntegerOverflow { node: NODE });

        let err = eval_op(&Op::Neg, &[Value::Int(i64::MIN)], NODE).unwrap_err();
        assert_eq!(err, EvalFault::IntegerOverflow { node: NODE });
    }

    #[test]
    fn mixed_types_mismatch() {
        let err = arith(ArithOp::Add, Value::Int(1), Value::Float(1.0)).unwrap_err();
        match err {
            EvalFault::TypeMismatch { got, .. } => assert_eq!(got, "int and float"),
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn compare_produces_bool() {
        let out = eval_op(&Op::Compare(CmpOp::Lt), &[Value::Int(1), Value::Int(2)], NODE).unwrap();
        assert_eq!(out, Some(Value::Bool(true)));
    }

    #[test]
    fn raise_always_faults() {
        let op = Op::Raise {
            message: "boom".into(),
        };
        let err = eval_op(&op, &[Value::Int(0)], NODE).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn missing_input_is_reported() {
        let err = eval_op(&Op::Arith(ArithOp::Add), &[Value::Int(1)], NODE).unwrap_err();
        assert_eq!(err, EvalFault::MissingValue { node: NODE, input: 1 });
    }
}
