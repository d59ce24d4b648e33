//! In-memory record views over a block's revision stream (spec.md §3.6,
//! §4.5).
//!
//! ## Design invariants
//!
//! - `present[key]` always equals `history[key]` replayed with ADD/REMOVE
//!   semantics (spec.md §3.6 invariant 1).
//! - Primary records require non-decreasing versions across consecutive
//!   appends for the same key (invariant 2); Secondary/Corpus relax this.
//! - The offset invariant (invariant 3) rejects an ADD for an
//!   already-present value, or a REMOVE for an absent one — waived for
//!   Corpus records, which legitimately see overlapping n-grams.
//! - An empty `present[key]` set is evicted on REMOVE (invariant 4).
//!
//! Grounded on the teacher's `engine::utils::Record`/`MergeIterator` (the
//! "unified point put/delete representation" idea, generalized here to a
//! per-key present/history pair) and `engine::visibility::VisibilityFilter`
//! (timestamp-bounded replay).

mod corpus;
mod index;
mod table;

pub use corpus::CorpusRecord;
pub use index::{ExploreError, IndexRecord};
pub use table::TableRecord;

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::block::{BlockKind, CompactRevision, Revision, RevisionSink};
use crate::value::{Action, Identifier, Position, Text, Value};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("append violates the offset invariant for this key")]
    OffsetViolation,

    #[error("version {got} is not >= last-seen version {last} for this key")]
    NonMonotonicVersion { last: i64, got: i64 },

    #[error("COMPARE is a non-storable sentinel action")]
    NonStorableAction,
}

/// Marker type selecting the Primary (table) view's `(Locator, Key,
/// Value)` triple (spec.md §3.3).
#[derive(Debug, Clone, Copy)]
pub struct Primary;

impl BlockKind for Primary {
    type Locator = Identifier;
    type Key = Text;
    type Value = Value;
}

/// Marker type selecting the Secondary (index) view.
#[derive(Debug, Clone, Copy)]
pub struct Secondary;

impl BlockKind for Secondary {
    type Locator = Text;
    type Key = Value;
    type Value = Identifier;
}

/// Marker type selecting the Corpus (n-gram) view.
#[derive(Debug, Clone, Copy)]
pub struct CorpusKind;

impl BlockKind for CorpusKind {
    type Locator = Text;
    type Key = Text;
    type Value = Position;
}

/// Shared present/history bookkeeping for one locator across any
/// `BlockKind` (spec.md §3.6). `TableRecord`/`IndexRecord`/`CorpusRecord`
/// wrap this with their view-specific operations.
#[derive(Debug, Clone)]
pub struct Record<B: BlockKind> {
    pub locator: B::Locator,
    /// Constrains which keys this record accepts appends for; `None`
    /// means "accept appends for any key" (spec.md §3.6: "optional
    /// partial-key K").
    partial_key: Option<B::Key>,
    present: BTreeMap<B::Key, BTreeSet<B::Value>>,
    history: BTreeMap<B::Key, Vec<CompactRevision<B::Value>>>,
    enforce_offset: bool,
    enforce_monotonic_version: bool,
}

impl<B: BlockKind> Record<B> {
    pub fn new(locator: B::Locator, enforce_offset: bool, enforce_monotonic_version: bool) -> Self {
        Self {
            locator,
            partial_key: None,
            present: BTreeMap::new(),
            history: BTreeMap::new(),
            enforce_offset,
            enforce_monotonic_version,
        }
    }

    pub fn with_partial_key(mut self, key: B::Key) -> Self {
        self.partial_key = Some(key);
        self
    }

    fn key_permitted(&self, key: &B::Key) -> bool {
        match &self.partial_key {
            Some(partial) => partial == key,
            None => true,
        }
    }

    /// Append one revision's worth of data for `key` (spec.md §3.6).
    /// `Action::Compare` is a query-time-only sentinel and is rejected.
    pub fn append(&mut self, key: B::Key, value: B::Value, version: i64, action: Action) -> Result<(), RecordError> {
        if action == Action::Compare {
            return Err(RecordError::NonStorableAction);
        }

        if self.enforce_monotonic_version {
            if let Some(last) = self.history.get(&key).and_then(|revisions| revisions.last()) {
                if version < last.version {
                    return Err(RecordError::NonMonotonicVersion { last: last.version, got: version });
                }
            }
        }

        if self.enforce_offset {
            let currently_present = self
                .present
                .get(&key)
                .map(|set| set.contains(&value))
                .unwrap_or(false);
            let violates = match action {
                Action::Add => currently_present,
                Action::Remove => !currently_present,
                Action::Compare => unreachable!(),
            };
            if violates {
                return Err(RecordError::OffsetViolation);
            }
        }

        match action {
            Action::Add => {
                self.present.entry(key.clone()).or_default().insert(value.clone());
            }
            Action::Remove => {
                if let Some(set) = self.present.get_mut(&key) {
                    set.remove(&value);
                    if set.is_empty() {
                        self.present.remove(&key);
                    }
                }
            }
            Action::Compare => unreachable!(),
        }

        self.history
            .entry(key)
            .or_default()
            .push(CompactRevision { value, version, action });
        Ok(())
    }

    pub fn present_for(&self, key: &B::Key) -> Option<&BTreeSet<B::Value>> {
        self.present.get(key)
    }

    pub fn present(&self) -> &BTreeMap<B::Key, BTreeSet<B::Value>> {
        &self.present
    }

    pub fn history_for(&self, key: &B::Key) -> Option<&[CompactRevision<B::Value>]> {
        self.history.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self) -> bool {
        !self.present.is_empty()
    }

    /// Every key this record has ever seen an append for, present or not
    /// — needed to enumerate a historical snapshot where a key may have
    /// gone empty since `timestamp`.
    pub fn known_keys(&self) -> impl Iterator<Item = &B::Key> {
        self.history.keys()
    }

    /// Historical replay (spec.md §4.5): iterate `history[key]` in version
    /// order accumulating a set, stopping once a revision's version
    /// exceeds `timestamp`. ADD inserts, REMOVE deletes.
    pub fn replay_at(&self, key: &B::Key, timestamp: i64) -> BTreeSet<B::Value> {
        let mut acc = BTreeSet::new();
        let Some(revisions) = self.history.get(key) else {
            return acc;
        };
        for revision in revisions {
            if revision.version > timestamp {
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
        }
        acc
    }
}

impl<B: BlockKind> RevisionSink<B> for Record<B> {
    fn absorb(&mut self, revision: Revision<B>) {
        if !self.key_permitted(&revision.key) {
            return;
        }
        // Data replayed from a synced block is already offset-invariant
        // consistent by construction; a rejection here would indicate
        // block corruption rather than a caller error, so it is dropped
        // rather than propagated through the `RevisionSink` interface.
        let _ = self.append(revision.key, revision.value, revision.version, revision.action);
    }
}
