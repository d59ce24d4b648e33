//! Infix query scoring against a corpus's `present` map (spec.md §4.6
//! "Search"). Generic over the lookup so both `CorpusRecord::search` and
//! any future buffer-side scoring path share one implementation (spec.md
//! §9's search-scoring consistency decision).

use std::collections::{HashMap, HashSet};

use crate::config::EngineConfig;
use crate::value::Identifier;

use super::tokenizer::tokenize;

/// Lowercase/tokenize `query`, skip stop words while tracking their count
/// as a positional offset, and intersect each subsequent term's matching
/// records by adjacency: a record survives iff the new term occurs at
/// `previous_position + 1 + accumulated_offset`. `lookup(term)` returns,
/// for the current term, every record and the set of positions at which
/// it occurs (`present[term]`). Returns `(record, score)` pairs ordered by
/// descending score (positional-match count), ties broken by ascending
/// record id.
pub fn search<L>(query: &str, config: &EngineConfig, lookup: L) -> Vec<(Identifier, usize)>
where
    L: Fn(&str) -> HashMap<Identifier, HashSet<u32>>,
{
    let mut candidates: Option<HashMap<Identifier, HashSet<u32>>> = None;
    let mut accumulated_offset: u32 = 0;

    for (_, token) in tokenize(query) {
        if config.stop_words.contains(&token) {
            accumulated_offset += 1;
            continue;
        }

        let positions = lookup(&token);
        candidates = Some(match candidates {
            None => positions,
            Some(prev) => intersect(prev, positions, accumulated_offset),
        });
        accumulated_offset = 0;
    }

    let mut results: Vec<(Identifier, usize)> = candidates
        .unwrap_or_default()
        .into_iter()
        .map(|(record, positions)| (record, positions.len()))
        .collect();
    results.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    results
}

fn intersect(
    prev: HashMap<Identifier, HashSet<u32>>,
    next: HashMap<Identifier, HashSet<u32>>,
    offset: u32,
) -> HashMap<Identifier, HashSet<u32>> {
    let mut out = HashMap::new();
    for (record, next_positions) in next {
        let Some(prev_positions) = prev.get(&record) else {
            continue;
        };
        let matched: HashSet<u32> = next_positions
            .into_iter()
            .filter(|p| {
                p.checked_sub(1 + offset)
                    .is_some_and(|required| prev_positions.contains(&required))
            })
            .collect();
        if !matched.is_empty() {
            out.insert(record, matched);
        }
    }
    out
}
