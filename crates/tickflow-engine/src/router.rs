//! Per-branch error routing for mapped nodes.
//!
//! A [`BranchErrorRouter`] owns one error slot per live branch of a map
//! node, indexed by [`BranchKey`]. Slots are created and removed only by the
//! branch lifecycle (`add_branch` / `remove_branch`); routing a record
//! writes into an existing slot and never touches the key set or any other
//! slot.

use tracing::warn;

use tickflow_core::{BranchKey, CoreError, EngineTime};

use crate::record::ErrorRecord;
use crate::series::KeyedOutput;
use crate::value::Value;

/// Keyed error stream of a mapped node.
#[derive(Debug, Clone, Default)]
pub struct BranchErrorRouter {
    slots: KeyedOutput,
}

impl BranchErrorRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an empty slot for a branch added at `time`. Idempotent.
    pub fn add_branch(&mut self, key: BranchKey, time: EngineTime) {
        self.slots.insert_key(key, time);
    }

    /// Drops the slot of a branch retired at `time`. Returns `true` if it
    /// existed.
    pub fn remove_branch(&mut self, key: &BranchKey, time: EngineTime) -> bool {
        self.slots.remove_key(key, time)
    }

    /// Writes `record`, tagged with `key`, into that branch's slot.
    ///
    /// Fails with [`CoreError::UnknownBranch`] when `key` is not live; the
    /// router never creates slots on write.
    pub fn route(&mut self, key: &BranchKey, record: &ErrorRecord, time: EngineTime) -> Result<(), CoreError> {
        if !self.slots.contains_key(key) {
            return Err(CoreError::UnknownBranch { key: key.clone() });
        }
        warn!(branch = %key, %time, error = record.message(), "branch fault captured");
        self.slots
            .set(key, Value::Error(Box::new(record.with_branch(key.clone()))), time);
        Ok(())
    }

    /// Live branch keys, in the order they were added.
    pub fn keys(&self) -> impl Iterator<Item = &BranchKey> {
        self.slots.keys()
    }

    pub fn contains(&self, key: &BranchKey) -> bool {
        self.slots.contains_key(key)
    }

    /// The record routed for `key` at `time`, if that branch faulted then.
    pub fn ticked(&self, key: &BranchKey, time: EngineTime) -> Option<&ErrorRecord> {
        self.slots
            .get(key)
            .and_then(|slot| slot.ticked(time))
            .and_then(Value::as_error)
    }

    /// Every branch that faulted at `time`.
    pub fn faulted(&self, time: EngineTime) -> impl Iterator<Item = (&BranchKey, &ErrorRecord)> {
        self.slots
            .ticked(time)
            .filter_map(|(key, value)| value.as_error().map(|record| (key, record)))
    }

    pub fn slots(&self) -> &KeyedOutput {
        &self.slots
    }

    pub(crate) fn retract(&mut self, time: EngineTime) -> usize {
        self.slots.retract(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickflow_core::NodeSignature;

    fn record(message: &str, time: EngineTime) -> ErrorRecord {
        ErrorRecord::new(
            message.into(),
            NodeSignature::new("div", vec![], None),
            vec![],
            vec![],
            false,
            time,
        )
    }

    fn key(k: &str) -> BranchKey {
        BranchKey::from(k)
    }

    #[test]
    fn new_branch_has_empty_slot() {
        let mut router = BranchErrorRouter::new();
        router.add_branch(key("X"), EngineTime(1));
        assert!(router.contains(&key("X")));
        assert!(router.slots().get(&key("X")).is_some_and(|slot| !slot.is_valid()));
    }

    #[test]
    fn routing_touches_only_its_key() {
        let t = EngineTime(1);
        let mut router = BranchErrorRouter::new();
        router.add_branch(key("X"), EngineTime(1));
        router.add_branch(key("Y"), EngineTime(1));
        router.route(&key("X"), &record("boom", t), t).unwrap();

        let routed = router.ticked(&key("X"), t).unwrap();
        assert_eq!(routed.message(), "boom");
        assert_eq!(routed.branch(), Some(&key("X")));
        assert!(router.ticked(&key("Y"), t).is_none());
        assert_eq!(router.faulted(t).count(), 1);
    }

    #[test]
    fn routing_to_unknown_branch_fails_without_creating_it() {
        let t = EngineTime(1);
        let mut router = BranchErrorRouter::new();
        let err = router.route(&key("Z"), &record("boom", t), t).unwrap_err();
        assert_eq!(err, CoreError::UnknownBranch { key: key("Z") });
        assert_eq!(router.keys().count(), 0);
    }

    #[test]
    fn removing_a_branch_drops_its_slot() {
        let t = EngineTime(1);
        let mut router = BranchErrorRouter::new();
        router.add_branch(key("X"), EngineTime(1));
        router.route(&key("X"), &record("boom", t), t).unwrap();
        assert!(router.remove_branch(&key("X"), t));
        assert!(!router.contains(&key("X")));
        assert!(router.ticked(&key("X"), t).is_none());
        assert!(!router.remove_branch(&key("X"), t));
    }

    #[test]
    fn slot_is_quiescent_on_later_cycles() {
        let mut router = BranchErrorRouter::new();
        router.add_branch(key("X"), EngineTime(1));
        router.route(&key("X"), &record("boom", EngineTime(1)), EngineTime(1)).unwrap();
        assert!(router.ticked(&key("X"), EngineTime(2)).is_none());
    }
}
