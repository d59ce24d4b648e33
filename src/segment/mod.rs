//! Segment: a group of three blocks (Primary, Secondary, optional Corpus)
//! derived from the same source writes and sharing one id (spec.md §3.5,
//! §4.7).
//!
//! Grounded on the teacher's per-generation SSTable-plus-manifest-entry
//! pairing (`manifest::ManifestSstEntry`/`AddSst` event): a segment's
//! manifest record is the commit point, written only after every block it
//! names has finished syncing — mirroring the teacher's
//! write-SSTable-then-record-in-manifest ordering.

use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::block::{Block, BlockError, BlockStats};
use crate::config::EngineConfig;
use crate::encoding::{Decode, Encode, EncodingError};
use crate::record::{CorpusKind, Primary, Secondary};
use crate::search::{self, SearchError};
use crate::value::{Action, Identifier, Text, Value};
use crate::write::Write;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("block error: {0}")]
    Block(#[from] BlockError),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("search indexing error: {0}")]
    Search(#[from] SearchError),

    #[error("segment is missing a valid manifest: {0}")]
    MissingManifest(String),

    #[error("segment {0} is unbalanced: primary and secondary must both carry revisions")]
    Unbalanced(u64),

    #[error("segments {0} and {1} partially overlap; refusing to start")]
    PartialOverlap(u64, u64),
}

/// The revisions produced by a single `transfer` call. Corpus revisions
/// are not retained — corpus records are never cached (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct Receipt {
    pub primary_locator: Identifier,
    pub primary_key: Text,
    pub primary_value: Value,
    pub secondary_locator: Text,
    pub secondary_key: Value,
    pub secondary_value: Identifier,
    pub version: i64,
    pub action: Action,
}

/// One generation of the durable store: one mutable-until-sync instance
/// each of the Primary and Secondary blocks, and a Corpus block whenever
/// at least one transferred write carried a string value.
pub struct Segment {
    pub id: u64,
    dir: PathBuf,
    primary: Block<Primary>,
    secondary: Block<Secondary>,
    corpus: Option<Block<CorpusKind>>,
}

impl Segment {
    /// A brand-new segment directory with fresh, empty, mutable blocks.
    pub fn create(segments_dir: &Path, id: u64, config: &EngineConfig) -> Result<Self, SegmentError> {
        let dir = segments_dir.join(id.to_string());
        let primary_dir = dir.join("primary");
        let secondary_dir = dir.join("secondary");
        fs::create_dir_all(&primary_dir)?;
        fs::create_dir_all(&secondary_dir)?;

        let primary = Block::create(&primary_dir, id, config.bloom_filter_expected_items, config.bloom_filter_fp_rate)?;
        let secondary = Block::create(&secondary_dir, id, config.bloom_filter_expected_items, config.bloom_filter_fp_rate)?;

        Ok(Self { id, dir, primary, secondary, corpus: None })
    }

    fn corpus_dir(&self) -> PathBuf {
        self.dir.join("corpus")
    }

    fn ensure_corpus(&mut self, config: &EngineConfig) -> Result<(), SegmentError> {
        if self.corpus.is_none() {
            let corpus_dir = self.corpus_dir();
            fs::create_dir_all(&corpus_dir)?;
            self.corpus = Some(Block::create(&corpus_dir, self.id, config.bloom_filter_expected_items, config.bloom_filter_fp_rate)?);
        }
        Ok(())
    }

    /// Dispatch `write` into the Primary block, the Secondary block (key
    /// and value swapped), and the Corpus block when the value is a
    /// string (spec.md §4.7). Returns a `Receipt` describing the Primary
    /// and Secondary revisions produced.
    pub fn transfer(&mut self, write: &Write, config: &EngineConfig) -> Result<Receipt, SegmentError> {
        let string_value = write.value.as_text().map(str::to_string);
        let corpus_tasks = match &string_value {
            Some(text) => Some(search::expand(config, &write.key, text, write.record, write.version, write.action)),
            None => None,
        };
        if corpus_tasks.is_some() {
            self.ensure_corpus(config)?;
        }
        let corpus = self.corpus.as_ref();

        let primary = &self.primary;
        let secondary = &self.secondary;
        let mut primary_result = None;
        let mut secondary_result = None;
        let mut corpus_result = None;

        crossbeam::scope(|scope| {
            let h1 = scope.spawn(|_| primary.insert(write.record, write.key.clone(), write.value.clone(), write.version, write.action));
            let h2 = scope.spawn(|_| {
                secondary.insert(write.key.clone(), write.value.clone(), write.record, write.version, write.action)
            });
            let h3 = corpus.map(|corpus_block| {
                scope.spawn(|_| {
                    let tasks = corpus_tasks.expect("corpus present implies tasks present");
                    search::dispatch(config, tasks, |task| {
                        corpus_block
                            .insert(task.field.clone(), task.substring.clone(), task.position, task.version, task.action)
                            .map_err(|e| SearchError::Insert(e.to_string()))
                    })
                })
            });

            primary_result = Some(h1.join().expect("primary insert thread panicked"));
            secondary_result = Some(h2.join().expect("secondary insert thread panicked"));
            if let Some(h3) = h3 {
                corpus_result = Some(h3.join().expect("corpus dispatch thread panicked"));
            }
        })
        .map_err(|_| SegmentError::Block(BlockError::MalformedBlock("transfer worker thread panicked".to_string())))?;

        primary_result.expect("spawned")?;
        secondary_result.expect("spawned")?;
        if let Some(result) = corpus_result {
            result?;
        }

        Ok(Receipt {
            primary_locator: write.record,
            primary_key: write.key.clone(),
            primary_value: write.value.clone(),
            secondary_locator: write.key.clone(),
            secondary_key: write.value.clone(),
            secondary_value: write.record,
            version: write.version,
            action: write.action,
        })
    }

    /// `true` iff both Primary and Secondary blocks carry revisions
    /// (spec.md §3.5).
    pub fn is_balanced(&self) -> bool {
        !self.primary.is_empty() && !self.secondary.is_empty()
    }

    fn combined_stats(&self) -> Vec<BlockStats> {
        let mut out = vec![self.primary.stats(), self.secondary.stats()];
        if let Some(corpus) = &self.corpus {
            out.push(corpus.stats());
        }
        out
    }

    /// `(minVersion, maxVersion)` across every block in this segment,
    /// used for chronological ordering and overlap detection (spec.md
    /// §4.7).
    pub fn version_range(&self) -> (i64, i64) {
        let stats = self.combined_stats();
        let min = stats.iter().map(|s| s.min_version).min().unwrap_or(i64::MAX);
        let max = stats.iter().map(|s| s.max_version).max().unwrap_or(i64::MIN);
        (min, max)
    }

    pub fn primary(&self) -> &Block<Primary> {
        &self.primary
    }

    pub fn secondary(&self) -> &Block<Secondary> {
        &self.secondary
    }

    pub fn corpus(&self) -> Option<&Block<CorpusKind>> {
        self.corpus.as_ref()
    }

    /// Fsync all three blocks in parallel, then write the manifest file
    /// last (Open Question (a): manifest-written-last is the commit
    /// point). Atomicity across the three block files is a known
    /// limitation (spec.md §9).
    pub fn sync(&self) -> Result<(), SegmentError> {
        if !self.is_balanced() {
            return Err(SegmentError::Unbalanced(self.id));
        }

        let primary = &self.primary;
        let secondary = &self.secondary;
        let corpus = self.corpus.as_ref();
        let mut results = Vec::new();

        crossbeam::scope(|scope| {
            let h1 = scope.spawn(|_| primary.sync());
            let h2 = scope.spawn(|_| secondary.sync());
            let h3 = corpus.map(|c| scope.spawn(|_| c.sync()));
            results.push(h1.join().expect("primary sync thread panicked"));
            results.push(h2.join().expect("secondary sync thread panicked"));
            if let Some(h3) = h3 {
                results.push(h3.join().expect("corpus sync thread panicked"));
            }
        })
        .map_err(|_| SegmentError::Block(BlockError::MalformedBlock("sync worker thread panicked".to_string())))?;

        for result in results {
            result?;
        }

        write_manifest(&self.dir, self.corpus.is_some(), self.version_range())?;
        Ok(())
    }

    /// Load an already-synced segment. Requires a valid manifest file —
    /// its absence or corruption means the segment never finished
    /// syncing and is treated as not-present (spec.md §4.7, §9).
    pub fn open(segments_dir: &Path, id: u64) -> Result<Self, SegmentError> {
        let dir = segments_dir.join(id.to_string());
        let manifest = read_manifest(&dir)
            .map_err(|e| SegmentError::MissingManifest(format!("segment {id}: {e}")))?;

        let primary = Block::open(&dir.join("primary"), id)?;
        let secondary = Block::open(&dir.join("secondary"), id)?;
        let corpus = if manifest.has_corpus {
            Some(Block::open(&dir.join("corpus"), id)?)
        } else {
            None
        };

        let segment = Self { id, dir, primary, secondary, corpus };
        if !segment.is_balanced() {
            return Err(SegmentError::Unbalanced(id));
        }
        Ok(segment)
    }
}

struct Manifest {
    has_corpus: bool,
}

fn manifest_path(dir: &Path) -> PathBuf {
    dir.join("manifest")
}

fn write_manifest(dir: &Path, has_corpus: bool, version_range: (i64, i64)) -> Result<(), SegmentError> {
    let path = manifest_path(dir);
    let tmp_path = dir.join("manifest.tmp");

    let mut body = Vec::new();
    has_corpus.encode_to(&mut body)?;
    version_range.0.encode_to(&mut body)?;
    version_range.1.encode_to(&mut body)?;

    let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
    file.write_all(&body)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

fn read_manifest(dir: &Path) -> Result<Manifest, SegmentError> {
    let bytes = fs::read(manifest_path(dir))?;
    let (has_corpus, _) = bool::decode_from(&bytes)?;
    Ok(Manifest { has_corpus })
}

/// Sort `segments` chronologically by `(minVersion, maxVersion)`, drop
/// exact-range duplicates (aborted optimization/reindex residue), and
/// refuse to start if any pair partially overlaps (spec.md §4.7).
pub fn resolve_overlaps(mut segments: Vec<Segment>) -> Result<Vec<Segment>, SegmentError> {
    segments.sort_by_key(|s| s.version_range());

    let mut out: Vec<Segment> = Vec::with_capacity(segments.len());
    for segment in segments {
        let range = segment.version_range();
        if let Some(last) = out.last() {
            let last_range = last.version_range();
            if last_range == range {
                continue; // exact duplicate, drop it
            }
            if range.0 < last_range.1 {
                return Err(SegmentError::PartialOverlap(last.id, segment.id));
            }
        }
        out.push(segment);
    }
    Ok(out)
}
