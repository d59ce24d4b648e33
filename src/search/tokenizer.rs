//! Lowercase whitespace tokenization and n-gram substring expansion
//! (spec.md §4.6 steps 1-3).

use std::collections::HashSet;

/// Lowercase `text` and split on runs of whitespace, pairing each token
/// with its absolute position in the token stream (spec.md §4.6 step 2).
/// Stop words are not filtered here — they still occupy a position slot
/// so that adjacency offsets line up at search time.
pub fn tokenize(text: &str) -> Vec<(u32, String)> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .enumerate()
        .map(|(i, token)| (i as u32, token))
        .collect()
}

/// Enumerate every substring `term[i..j]` with `1 <= j-i <= max_len`
/// (unbounded when `max_len <= 0`), trimmed, with empty, stop-word, and
/// within-token duplicate substrings dropped (spec.md §4.6 step 3).
pub fn expand_substrings(term: &str, max_len: i64, stop_words: &HashSet<String>) -> Vec<String> {
    let chars: Vec<char> = term.chars().collect();
    let n = chars.len();
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for i in 0..n {
        let max_j = if max_len <= 0 {
            n
        } else {
            (i + max_len as usize).min(n)
        };
        for j in (i + 1)..=max_j {
            let substring: String = chars[i..j].iter().collect();
            let trimmed = substring.trim().to_string();
            if trimmed.is_empty() || stop_words.contains(&trimmed) || !seen.insert(trimmed.clone()) {
                continue;
            }
            out.push(trimmed);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_positions() {
        let tokens = tokenize("Johnny Appleseed lives here");
        assert_eq!(
            tokens,
            vec![
                (0, "johnny".to_string()),
                (1, "appleseed".to_string()),
                (2, "lives".to_string()),
                (3, "here".to_string()),
            ]
        );
    }

    #[test]
    fn expand_substrings_dedups_and_bounds_length() {
        let stop_words = HashSet::new();
        let out = expand_substrings("aaa", 2, &stop_words);
        // i=0: "a","aa"; i=1: "a"(dup),"aa"(dup); i=2: "a"(dup)
        assert_eq!(out, vec!["a".to_string(), "aa".to_string()]);
    }

    #[test]
    fn expand_substrings_drops_stop_words() {
        let mut stop_words = HashSet::new();
        stop_words.insert("at".to_string());
        let out = expand_substrings("at", 0, &stop_words);
        assert!(out.is_empty());
    }

    #[test]
    fn expand_substrings_unbounded_when_non_positive() {
        let stop_words = HashSet::new();
        let out = expand_substrings("bio", 0, &stop_words);
        assert!(out.contains(&"bio".to_string()));
        assert!(out.contains(&"bi".to_string()));
        assert!(out.contains(&"b".to_string()));
    }
}
