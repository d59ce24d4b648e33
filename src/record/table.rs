//! `TableRecord` — the Primary view: `record -> field -> values` (spec.md
//! §4.5).

use std::collections::{BTreeMap, BTreeSet};

use crate::block::CompactRevision;
use crate::value::{Action, Identifier, Text, Value};

use super::{Primary, Record, RecordError};

/// A single record's per-field present state and history (Primary view).
#[derive(Debug, Clone)]
pub struct TableRecord(Record<Primary>);

impl TableRecord {
    pub fn new(record: Identifier) -> Self {
        Self(Record::new(record, true, true))
    }

    /// A record restricted to a single field, for callers that only ever
    /// need that field's present/history data (the Database's
    /// primary-partial cache tier; spec.md §4.8).
    pub fn restricted(record: Identifier, key: Text) -> Self {
        Self(Record::new(record, true, true).with_partial_key(key))
    }

    pub fn locator(&self) -> Identifier {
        self.0.locator
    }

    pub fn inner_mut(&mut self) -> &mut Record<Primary> {
        &mut self.0
    }

    pub fn inner(&self) -> &Record<Primary> {
        &self.0
    }

    pub fn append(&mut self, key: Text, value: Value, version: i64, action: crate::value::Action) -> Result<(), RecordError> {
        self.0.append(key, value, version, action)
    }

    /// All fields and their full present-value sets.
    pub fn describe(&self) -> &std::collections::BTreeMap<Text, BTreeSet<Value>> {
        self.0.present()
    }

    /// Every field ever written, present or not — for historical
    /// `describe_at` snapshots where a field may have since emptied out.
    pub fn known_fields(&self) -> Vec<Text> {
        self.0.known_keys().cloned().collect()
    }

    /// `describe()` as of `timestamp` (spec.md §4.5 historical replay).
    pub fn describe_at(&self, timestamp: i64) -> std::collections::BTreeMap<Text, BTreeSet<Value>> {
        let mut out = std::collections::BTreeMap::new();
        for field in self.known_fields() {
            let set = self.fetch_at(&field, timestamp);
            if !set.is_empty() {
                out.insert(field, set);
            }
        }
        out
    }

    /// Every historical revision recorded for `key`, in version order.
    pub fn audit(&self, key: &Text) -> &[CompactRevision<Value>] {
        self.0.history_for(key).unwrap_or(&[])
    }

    /// Liveness probe: `true` if this record has any present field at all.
    pub fn ping(&self) -> bool {
        self.0.contains()
    }

    pub fn contains(&self) -> bool {
        self.0.contains()
    }

    /// Current values for `key`.
    pub fn fetch(&self, key: &Text) -> BTreeSet<Value> {
        self.0.present_for(key).cloned().unwrap_or_default()
    }

    /// Values for `key` as of `timestamp` (spec.md §4.5 historical
    /// replay).
    pub fn fetch_at(&self, key: &Text, timestamp: i64) -> BTreeSet<Value> {
        self.0.replay_at(key, timestamp)
    }

    /// `true` iff `value` is (or, at `timestamp`, was) present for `key`.
    pub fn verify(&self, key: &Text, value: &Value, timestamp: Option<i64>) -> bool {
        match timestamp {
            Some(ts) => self.fetch_at(key, ts).contains(value),
            None => self.0.present_for(key).is_some_and(|set| set.contains(value)),
        }
    }

    /// Replays `key`'s full history in version order, accumulating the
    /// present-value set after every revision, and records a snapshot for
    /// each revision whose version falls within `[start, end]` (spec.md
    /// §8.2 Scenario 5): `ADD k v1@t1`, `ADD k v2@t2`, `REMOVE k v1@t3`
    /// chronologized over `[t1, t3]` yields `{t1:{v1}, t2:{v1,v2},
    /// t3:{v2}}` — the accumulated state visible at each point, not a
    /// flat list of the revisions themselves.
    pub fn chronologize(&self, key: &Text, start: i64, end: i64) -> BTreeMap<i64, BTreeSet<Value>> {
        let mut acc = BTreeSet::new();
        let mut out = BTreeMap::new();
        for revision in self.0.history_for(key).unwrap_or(&[]) {
            if revision.version > end {
                break;
            }
            match revision.action {
                Action::Add => {
                    acc.insert(revision.value.clone());
                }
                Action::Remove => {
                    acc.remove(&revision.value);
                }
                Action::Compare => {}
            }
            if revision.version >= start {
                out.insert(revision.version, acc.clone());
            }
        }
        out
    }
}
