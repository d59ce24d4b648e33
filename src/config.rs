//! Immutable engine configuration (spec.md §9: "treat as an immutable
//! `EngineConfig` struct passed into the database at construction; avoid
//! process-wide singletons"). Grounded on the teacher's `EngineConfig` in
//! `engine/mod.rs`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Construction-time configuration for a [`crate::database::Database`].
///
/// Every field is set once at `Database::open` and never mutated; callers
/// that want different behavior construct a new `EngineConfig` and reopen.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory; see spec.md §6.1 for the on-disk layout beneath it.
    pub root: PathBuf,

    /// Size, in bytes, of a freshly allocated buffer page.
    pub page_size: u64,

    /// Lower-cased stop words excluded from corpus indexing and search.
    pub stop_words: HashSet<String>,

    /// Maximum n-gram substring length enumerated per token. `<= 0` means
    /// unbounded (spec.md §4.6 step 3).
    pub max_substring_len: i64,

    /// Search-indexer worker-pool size. If `None`, defaults to
    /// `max(3, ceil(0.5 * available_parallelism))` (spec.md §4.6 step 5).
    pub search_thread_pool_size: Option<usize>,

    /// Expected revision count used to size each block's bloom filter.
    pub bloom_filter_expected_items: usize,

    /// False-positive rate target for block bloom filters.
    pub bloom_filter_fp_rate: f64,

    /// Soft bound on entries held in each of the Database's three record
    /// caches (primary-full, primary-partial, secondary; spec.md §4.8).
    pub record_cache_capacity: usize,
}

impl EngineConfig {
    /// A reasonable default configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: 64 * 1024 * 1024,
            stop_words: default_stop_words(),
            max_substring_len: 0,
            search_thread_pool_size: None,
            bloom_filter_expected_items: 10_000,
            bloom_filter_fp_rate: 0.01,
            record_cache_capacity: 4096,
        }
    }

    pub fn buffer_dir(&self) -> PathBuf {
        self.root.join("buffer")
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.root.join("db").join("segments")
    }

    pub fn transaction_dir(&self) -> PathBuf {
        self.root.join("txn")
    }

    /// Record inventory file (spec.md §6.1 `buffer/meta/inventory`).
    pub fn inventory_file(&self) -> PathBuf {
        self.buffer_dir().join("meta").join("inventory")
    }

    pub fn db_schema_file(&self) -> PathBuf {
        self.root.join("db").join(".schema")
    }

    pub fn buffer_schema_file(&self) -> PathBuf {
        self.buffer_dir().join(".schema")
    }

    /// Resolved worker-pool size for the search indexer: `max(3,
    /// ceil(0.5 * cores))` unless explicitly overridden (spec.md §4.6).
    pub fn resolved_search_pool_size(&self) -> usize {
        self.search_thread_pool_size.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
            (cores.div_ceil(2)).max(3)
        })
    }
}

fn default_stop_words() -> HashSet<String> {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
        "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
        "these", "they", "this", "to", "was", "will", "with",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Ensure every directory named by `config`'s layout exists.
pub fn ensure_layout(config: &EngineConfig) -> std::io::Result<()> {
    for dir in [
        config.buffer_dir(),
        config.segments_dir(),
        config.transaction_dir(),
    ] {
        create_dir_all(&dir)?;
    }
    if let Some(meta_dir) = config.inventory_file().parent() {
        create_dir_all(meta_dir)?;
    }
    Ok(())
}

fn create_dir_all(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
