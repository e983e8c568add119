//! Static node signatures.
//!
//! A [`NodeSignature`] is the name of a node plus the semantic types of its
//! named inputs and its output. It is captured verbatim into every error
//! record produced for the node.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TsType;

/// Static description of a node: name, typed inputs, output type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSignature {
    pub name: String,
    /// Named, typed inputs in declaration order.
    pub args: Vec<(String, TsType)>,
    /// Output type (`None` for sink-like nodes).
    pub output: Option<TsType>,
}

impl NodeSignature {
    pub fn new(name: impl Into<String>, args: Vec<(String, TsType)>, output: Option<TsType>) -> Self {
        NodeSignature {
            name: name.into(),
            args,
            output,
        }
    }

    /// Returns `true` when this node produces a keyed (per-branch) output.
    pub fn has_keyed_output(&self) -> bool {
        self.output.as_ref().is_some_and(TsType::is_keyed)
    }
}

impl fmt::Display for NodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, (name, ty)) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {ty}")?;
        }
        f.write_str(")")?;
        if let Some(output) = &self.output {
            write!(f, " -> {output}")?;
        }
        Ok(())
    }
}
