//! Time-series output storage.
//!
//! A [`ScalarOutput`] retains its last value together with the time it last
//! ticked; "present at T" means "ticked at T". A [`KeyedOutput`] holds one
//! scalar output per live branch key. [`TsOutput`] is the structural union
//! the graph stores for every node, so a keyed stream can never be mistaken
//! for a scalar one.

use indexmap::IndexMap;

use tickflow_core::{BranchKey, EngineTime, TsType};

use crate::value::Value;

/// Last-value storage for a scalar time-series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarOutput {
    value: Option<Value>,
    last_modified: Option<EngineTime>,
}

impl ScalarOutput {
    /// The most recent value, regardless of when it ticked.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Returns `true` once the series has ever ticked.
    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }

    pub fn last_modified(&self) -> Option<EngineTime> {
        self.last_modified
    }

    pub fn modified_at(&self, time: EngineTime) -> bool {
        self.last_modified == Some(time)
    }

    /// The value if and only if the series ticked at `time`.
    pub fn ticked(&self, time: EngineTime) -> Option<&Value> {
        if self.modified_at(time) {
            self.value.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn set(&mut self, value: Value, time: EngineTime) {
        self.value = Some(value);
        self.last_modified = Some(time);
    }

    /// Forgets a tick made at `time`. Returns `true` if one was dropped.
    pub(crate) fn retract(&mut self, time: EngineTime) -> bool {
        if self.modified_at(time) {
            self.value = None;
            self.last_modified = None;
            true
        } else {
            false
        }
    }
}

/// One scalar series per live branch key.
///
/// Adding or removing a key is itself a tick of the collection, so a
/// consumer sees a key-set change even when no entry value moved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyedOutput {
    entries: IndexMap<BranchKey, ScalarOutput>,
    keys_modified: Option<EngineTime>,
}

impl KeyedOutput {
    pub fn get(&self, key: &BranchKey) -> Option<&ScalarOutput> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &BranchKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &BranchKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BranchKey, &ScalarOutput)> {
        self.entries.iter()
    }

    /// Entries that ticked at `time`.
    pub fn ticked(&self, time: EngineTime) -> impl Iterator<Item = (&BranchKey, &Value)> {
        self.entries
            .iter()
            .filter_map(move |(key, out)| out.ticked(time).map(|value| (key, value)))
    }

    /// Returns `true` if an entry ticked or the key set changed at `time`.
    pub fn modified_at(&self, time: EngineTime) -> bool {
        self.keys_modified == Some(time) || self.entries.values().any(|out| out.modified_at(time))
    }

    /// Snapshot of every valid entry as a dict value.
    pub fn to_value(&self) -> Value {
        Value::Dict(
            self.entries
                .iter()
                .filter_map(|(key, out)| out.value().map(|v| (key.clone(), v.clone())))
                .collect(),
        )
    }

    /// Creates an empty entry for `key` if none exists.
    pub(crate) fn insert_key(&mut self, key: BranchKey, time: EngineTime) {
        if !self.entries.contains_key(&key) {
            self.entries.insert(key, ScalarOutput::default());
            self.keys_modified = Some(time);
        }
    }

    pub(crate) fn remove_key(&mut self, key: &BranchKey, time: EngineTime) -> bool {
        let removed = self.entries.shift_remove(key).is_some();
        if removed {
            self.keys_modified = Some(time);
        }
        removed
    }

    pub(crate) fn set(&mut self, key: &BranchKey, value: Value, time: EngineTime) {
        if let Some(out) = self.entries.get_mut(key) {
            out.set(value, time);
        }
    }

    pub(crate) fn retract(&mut self, time: EngineTime) -> usize {
        if self.keys_modified == Some(time) {
            self.keys_modified = None;
        }
        self.entries
            .values_mut()
            .map(|out| out.retract(time))
            .filter(|dropped| *dropped)
            .count()
    }
}

/// Output storage of one node: scalar or keyed, fixed by its type.
#[derive(Debug, Clone, PartialEq)]
pub enum TsOutput {
    Scalar(ScalarOutput),
    Keyed(KeyedOutput),
}

impl TsOutput {
    /// Empty storage shaped after `ty`.
    pub fn for_type(ty: &TsType) -> TsOutput {
        if ty.is_keyed() {
            TsOutput::Keyed(KeyedOutput::default())
        } else {
            TsOutput::Scalar(ScalarOutput::default())
        }
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, TsOutput::Keyed(_))
    }

    pub fn as_scalar(&self) -> Option<&ScalarOutput> {
        match self {
            TsOutput::Scalar(out) => Some(out),
            TsOutput::Keyed(_) => None,
        }
    }

    pub fn as_keyed(&self) -> Option<&KeyedOutput> {
        match self {
            TsOutput::Keyed(out) => Some(out),
            TsOutput::Scalar(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            TsOutput::Scalar(out) => out.is_valid(),
            // A keyed series is valid once it has a key set, even an empty one.
            TsOutput::Keyed(_) => true,
        }
    }

    pub fn modified_at(&self, time: EngineTime) -> bool {
        match self {
            TsOutput::Scalar(out) => out.modified_at(time),
            TsOutput::Keyed(out) => out.modified_at(time),
        }
    }

    /// Current value as seen by a consuming node.
    pub fn value(&self) -> Option<Value> {
        match self {
            TsOutput::Scalar(out) => out.value().cloned(),
            TsOutput::Keyed(out) => Some(out.to_value()),
        }
    }
}
