//! `CorpusRecord` — the n-gram substring view: `field -> substring ->
//! positions` (spec.md §4.5/§4.6). The offset invariant is waived here:
//! overlapping n-grams from the same token are expected, not a conflict.

use std::collections::{HashMap, HashSet};

use crate::config::EngineConfig;
use crate::search;
use crate::value::{Action, Identifier, Position, Text};

use super::{CorpusKind, Record};

/// `field -> substring -> positions` (Corpus view).
#[derive(Debug, Clone)]
pub struct CorpusRecord(Record<CorpusKind>);

impl CorpusRecord {
    pub fn new(field: Text) -> Self {
        // Offset invariant waived (spec.md §3.6 invariant 3); no ordering
        // requirement on corpus appends either.
        Self(Record::new(field, false, false))
    }

    pub fn field(&self) -> &Text {
        &self.0.locator
    }

    pub fn append(&mut self, substring: Text, position: Position, version: i64, action: Action) -> Result<(), super::RecordError> {
        self.0.append(substring, position, version, action)
    }

    pub fn inner_mut(&mut self) -> &mut Record<CorpusKind> {
        &mut self.0
    }

    /// Records currently containing `infix` as one of its indexed
    /// substrings, optionally as of `timestamp` (spec.md §4.5 `locate`).
    pub fn locate(&self, infix: &str, timestamp: Option<i64>) -> HashSet<Identifier> {
        let term = Text::new(infix.to_lowercase());
        let positions = match timestamp {
            Some(ts) => self.0.replay_at(&term, ts),
            None => self.0.present_for(&term).cloned().unwrap_or_default(),
        };
        positions.into_iter().map(|p| p.record).collect()
    }

    fn lookup_for_search(&self, term: &str) -> HashMap<Identifier, HashSet<u32>> {
        let Some(positions) = self.0.present_for(&Text::new(term)) else {
            return HashMap::new();
        };
        let mut out: HashMap<Identifier, HashSet<u32>> = HashMap::new();
        for position in positions {
            out.entry(position.record).or_default().insert(position.index);
        }
        out
    }

    /// Infix phrase search (spec.md §4.6 "Search"): lowercase/tokenize
    /// `query`, track stop-word runs as adjacency offsets, and intersect
    /// positions term-over-term. Returns records ordered by descending
    /// positional-match count, ties broken by ascending record id.
    pub fn search(&self, query: &str, config: &EngineConfig) -> Vec<(Identifier, usize)> {
        search::search(query, config, |term| self.lookup_for_search(term))
    }
}
