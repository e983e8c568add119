//! The time-series type system as seen by the fault-isolation layer.
//!
//! Only the shape matters here: a node output is either a scalar time-series
//! ([`TsType::TimeSeries`]) or a keyed collection of time-series produced by
//! a map node ([`TsType::Keyed`]). The distinction is structural so that
//! callers can tell a scalar error stream from a keyed one without coercion.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element types carried by a scalar time-series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    Int,
    Float,
    Str,
    /// A captured node failure.
    Error,
}

/// Semantic type of a node input or output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TsType {
    /// A single time-series of scalar values.
    TimeSeries(ScalarType),
    /// One time-series per branch key, keyed by `str`.
    Keyed(Box<TsType>),
}

impl TsType {
    pub fn ts(scalar: ScalarType) -> TsType {
        TsType::TimeSeries(scalar)
    }

    pub fn keyed(value: TsType) -> TsType {
        TsType::Keyed(Box::new(value))
    }

    /// The scalar error stream type, `TimeSeries<error>`.
    pub fn error() -> TsType {
        TsType::TimeSeries(ScalarType::Error)
    }

    /// Returns `true` for collection-typed (keyed) series.
    pub fn is_keyed(&self) -> bool {
        matches!(self, TsType::Keyed(_))
    }

    /// The per-key element type for keyed series, `None` for scalar ones.
    pub fn element(&self) -> Option<&TsType> {
        match self {
            TsType::Keyed(inner) => Some(inner),
            TsType::TimeSeries(_) => None,
        }
    }

    /// Error stream type matching the shape of `self`: keyed stays keyed.
    pub fn error_stream(&self) -> TsType {
        match self {
            TsType::TimeSeries(_) => TsType::error(),
            TsType::Keyed(_) => TsType::keyed(TsType::error()),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::Bool => "bool",
            ScalarType::Int => "int",
            ScalarType::Float => "float",
            ScalarType::Str => "str",
            ScalarType::Error => "error",
        };
        f.write_str(name)
    }
}

impl fmt::Display for TsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsType::TimeSeries(scalar) => write!(f, "TimeSeries<{scalar}>"),
            TsType::Keyed(inner) => write!(f, "Keyed<str, {inner}>"),
        }
    }
}
