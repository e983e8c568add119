//! Logical evaluation time.
//!
//! The engine advances through a single global sequence of evaluation
//! cycles. [`EngineTime`] is the tick number of a cycle; it carries no
//! wall-clock meaning.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical time of one evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineTime(pub u64);

impl EngineTime {
    pub const START: EngineTime = EngineTime(0);

    /// The tick immediately after this one.
    pub fn next(self) -> EngineTime {
        EngineTime(self.0 + 1)
    }
}

impl fmt::Display for EngineTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_tick() {
        assert_eq!(EngineTime(12).to_string(), "t=12");
    }

    #[test]
    fn next_is_strictly_later() {
        let t = EngineTime::START;
        assert!(t.next() > t);
        assert_eq!(t.next(), EngineTime(1));
    }
}
