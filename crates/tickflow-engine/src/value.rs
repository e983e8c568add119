//! Runtime value representation for graph evaluation.
//!
//! [`Value`] is the dynamic counterpart of [`TsType`]: every tick of a
//! time-series carries one `Value`. Captured failures travel through the
//! graph as [`Value::Error`] so that user nodes can consume them like any
//! other series.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use tickflow_core::{BranchKey, ScalarType, TsType};

use crate::record::ErrorRecord;

/// A runtime value produced or consumed by a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Per-key values of a keyed collection, in key insertion order.
    Dict(IndexMap<BranchKey, Value>),
    /// A captured node failure.
    Error(Box<ErrorRecord>),
}

impl Value {
    /// Returns a human-readable description of the value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Dict(_) => "dict",
            Value::Error(_) => "error",
        }
    }

    /// Returns `true` if this value may tick on a series of type `ty`.
    ///
    /// Keyed series accept dicts whose entries all conform to the element
    /// type.
    pub fn conforms_to(&self, ty: &TsType) -> bool {
        match (self, ty) {
            (Value::Dict(entries), TsType::Keyed(element)) => {
                entries.values().all(|v| v.conforms_to(element))
            }
            (Value::Bool(_), TsType::TimeSeries(ScalarType::Bool))
            | (Value::Int(_), TsType::TimeSeries(ScalarType::Int))
            | (Value::Float(_), TsType::TimeSeries(ScalarType::Float))
            | (Value::Str(_), TsType::TimeSeries(ScalarType::Str))
            | (Value::Error(_), TsType::TimeSeries(ScalarType::Error)) => true,
            _ => false,
        }
    }

    pub fn as_dict(&self) -> Option<&IndexMap<BranchKey, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorRecord> {
        match self {
            Value::Error(record) => Some(&**record),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            // Debug keeps the trailing `.0` on integral floats.
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Value::Error(record) => write!(f, "<error: {}>", record.message()),
        }
    }
}
