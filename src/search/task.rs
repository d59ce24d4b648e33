//! `IndexTask` — one `(field, substring, position, version, action)` unit
//! produced by the corpus expansion pipeline, destined for a Corpus
//! block's `insert` (spec.md §4.6 step 4).

use crate::config::EngineConfig;
use crate::value::{Action, Identifier, Position, Text};

use super::tokenizer::{expand_substrings, tokenize};

#[derive(Debug, Clone)]
pub struct IndexTask {
    pub field: Text,
    pub substring: Text,
    pub position: Position,
    pub version: i64,
    pub action: Action,
}

/// Tokenize `value`, expand every non-stop-word token into its candidate
/// substrings, and produce one [`IndexTask`] per surviving substring
/// (spec.md §4.6 steps 1-4). Called only for writes whose value is a
/// string (the caller filters).
pub fn expand(
    config: &EngineConfig,
    field: &Text,
    value: &str,
    record: Identifier,
    version: i64,
    action: Action,
) -> Vec<IndexTask> {
    let mut tasks = Vec::new();
    for (index, token) in tokenize(value) {
        if config.stop_words.contains(&token) {
            continue;
        }
        for substring in expand_substrings(&token, config.max_substring_len, &config.stop_words) {
            tasks.push(IndexTask {
                field: field.clone(),
                substring: Text::new(substring),
                position: Position::new(record, index),
                version,
                action,
            });
        }
    }
    tasks
}
