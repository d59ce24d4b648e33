//! Block: the on-disk indexed form of one view (Primary/Secondary/Corpus)
//! of a segment (spec.md §3.4, §4.2, C3).
//!
//! Grounded end to end on the teacher's `sstable` module: header/footer CRC
//! framing, metaindex-style auxiliary lookup, and atomic tmp-then-rename
//! writes (`sstable::builder::SstWriter`), binary-search/linear-scan reads
//! (`sstable::iterator::BlockIterator`). Generalized from a single flat
//! key/value block to one generic over a [`BlockKind`] (`Locator`, `Key`,
//! `Value`) so the same code serves the Primary, Secondary, and Corpus
//! views (spec.md §3.3).

mod bloom;
mod index;

pub use bloom::BloomFilter;
pub use index::{BlockIndex, NO_ENTRY};

use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;

use crate::encoding::{Decode, Encode, EncodingError};
use crate::value::{Action, Composite};

/// Errors raised by the Block subsystem.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A block is missing one or more of its four on-disk files, or a file
    /// failed its checksum — the whole segment is rejected (spec.md §4.2,
    /// §7).
    #[error("malformed block: {0}")]
    MalformedBlock(String),

    #[error("bloom filter error: {0}")]
    Bloom(String),

    #[error("block index is immutable")]
    IndexImmutable,

    #[error("putEnd called before putStart for this composite")]
    PutEndWithoutStart,
}

/// Associates the `(Locator, Key, Value)` triple for one of the three views
/// (spec.md §3.3) with a single generic parameter, so `Block<K>` serves all
/// three without duplicating code.
pub trait BlockKind {
    type Locator: Encode + Decode + Ord + Clone;
    type Key: Encode + Decode + Ord + Clone;
    type Value: Encode + Decode + Ord + Clone;
}

/// A single modification to a `(locator, key)` pair, as stored in a block
/// (spec.md §3.3).
#[derive(Debug, Clone)]
pub struct Revision<B: BlockKind> {
    pub locator: B::Locator,
    pub key: B::Key,
    pub value: B::Value,
    pub version: i64,
    pub action: Action,
}

impl<B: BlockKind> Revision<B> {
    pub fn new(locator: B::Locator, key: B::Key, value: B::Value, version: i64, action: Action) -> Self {
        Self { locator, key, value, version, action }
    }

    /// `(value, version, action)` — what a record stores per history entry
    /// once the housing locator/key make the full revision redundant
    /// (spec.md §3.3).
    pub fn compact(&self) -> CompactRevision<B::Value> {
        CompactRevision {
            value: self.value.clone(),
            version: self.version,
            action: self.action,
        }
    }

    fn locator_composite(&self) -> Result<Composite, EncodingError> {
        Composite::builder().add(&self.locator).map(|b| b.build())
    }

    fn locator_key_composite(&self) -> Result<Composite, EncodingError> {
        Composite::builder()
            .add(&self.locator)
            .and_then(|b| b.add(&self.key))
            .map(|b| b.build())
    }

    fn full_composite(&self) -> Result<Composite, EncodingError> {
        Composite::builder()
            .add(&self.locator)
            .and_then(|b| b.add(&self.key))
            .and_then(|b| b.add(&self.value))
            .map(|b| b.build())
    }
}

/// `(value, version, action)` — a revision with its locator/key elided
/// (spec.md §3.3), as stored in a [`crate::record`] history list.
#[derive(Debug, Clone)]
pub struct CompactRevision<V> {
    pub value: V,
    pub version: i64,
    pub action: Action,
}

impl<B: BlockKind> Encode for Revision<B> {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.locator.encode_to(buf)?;
        self.key.encode_to(buf)?;
        self.value.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.action.encode_to(buf)
    }
}

impl<B: BlockKind> Decode for Revision<B> {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (locator, n1) = B::Locator::decode_from(buf)?;
        let (key, n2) = B::Key::decode_from(&buf[n1..])?;
        let (value, n3) = B::Value::decode_from(&buf[n1 + n2..])?;
        let (version, n4) = i64::decode_from(&buf[n1 + n2 + n3..])?;
        let (action, n5) = Action::decode_from(&buf[n1 + n2 + n3 + n4..])?;
        Ok((
            Revision { locator, key, value, version, action },
            n1 + n2 + n3 + n4 + n5,
        ))
    }
}

impl<B: BlockKind> PartialEq for Revision<B> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl<B: BlockKind> Eq for Revision<B> {}
impl<B: BlockKind> PartialOrd for Revision<B> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Natural revision comparator: `locator < key < value < version`
/// (spec.md §4.2). Action does not participate — two revisions differing
/// only in action are ordered by their (already decisive) version.
impl<B: BlockKind> Ord for Revision<B> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.locator
            .cmp(&other.locator)
            .then_with(|| self.key.cmp(&other.key))
            .then_with(|| self.value.cmp(&other.value))
            .then_with(|| self.version.cmp(&other.version))
    }
}

/// Running aggregate written to `<id>.stats` on sync (spec.md §4.2).
#[derive(Debug, Clone, Copy)]
pub struct BlockStats {
    pub min_version: i64,
    pub max_version: i64,
    pub count: u64,
    /// Rolling CRC32 over each revision's encoded bytes, in insertion
    /// order — an extra integrity precursor checked against `<id>.data`'s
    /// own checksum on load.
    pub checksum: u32,
}

impl BlockStats {
    fn new() -> Self {
        Self { min_version: i64::MAX, max_version: i64::MIN, count: 0, checksum: 0 }
    }

    fn observe(&mut self, version: i64, encoded: &[u8]) {
        self.min_version = self.min_version.min(version);
        self.max_version = self.max_version.max(version);
        self.count += 1;
        let mut hasher = Crc32::new();
        hasher.update(&self.checksum.to_be_bytes());
        hasher.update(encoded);
        self.checksum = hasher.finalize();
    }
}

impl Encode for BlockStats {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.min_version.encode_to(buf)?;
        self.max_version.encode_to(buf)?;
        self.count.encode_to(buf)?;
        self.checksum.encode_to(buf)
    }
}

impl Decode for BlockStats {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (min_version, n1) = i64::decode_from(buf)?;
        let (max_version, n2) = i64::decode_from(&buf[n1..])?;
        let (count, n3) = u64::decode_from(&buf[n1 + n2..])?;
        let (checksum, n4) = u32::decode_from(&buf[n1 + n2 + n3..])?;
        Ok((
            BlockStats { min_version, max_version, count, checksum },
            n1 + n2 + n3 + n4,
        ))
    }
}

/// Receives revisions decoded during a [`Block::seek`], honoring whatever
/// partiality constraints the caller's record enforces. Implemented by the
/// record types in [`crate::record`]; kept as a trait here so `block` has
/// no upward dependency on `record`.
pub trait RevisionSink<B: BlockKind> {
    fn absorb(&mut self, revision: Revision<B>);
}

struct MutableState<B: BlockKind> {
    revisions: Vec<Revision<B>>,
    bloom: BloomFilter,
    index: BlockIndex,
    stats: BlockStats,
}

enum BlockState<B: BlockKind> {
    Mutable(MutableState<B>),
    Immutable {
        mmap: Mmap,
        bloom: BloomFilter,
        index: BlockIndex,
        stats: BlockStats,
    },
}

/// One view's on-disk indexed revision set for a single segment (spec.md
/// §3.4). Mutable until `sync()`; immutable and lock-free for reads
/// thereafter.
pub struct Block<B: BlockKind> {
    pub id: u64,
    dir: PathBuf,
    state: Mutex<BlockState<B>>,
}

/// File extensions fixed by spec.md §6.1's on-disk layout.
fn data_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.blk"))
}
fn bloom_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.fltr"))
}
fn index_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.indx"))
}
fn stats_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.stat"))
}

impl<B: BlockKind> Block<B> {
    /// A brand-new, empty, mutable block.
    pub fn create(dir: &Path, id: u64, bloom_expected_items: usize, bloom_fp_rate: f64) -> Result<Self, BlockError> {
        Ok(Self {
            id,
            dir: dir.to_path_buf(),
            state: Mutex::new(BlockState::Mutable(MutableState {
                revisions: Vec::new(),
                bloom: BloomFilter::new(bloom_expected_items, bloom_fp_rate)?,
                index: BlockIndex::new(),
                stats: BlockStats::new(),
            })),
        })
    }

    pub fn is_empty(&self) -> bool {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            BlockState::Mutable(m) => m.revisions.is_empty(),
            BlockState::Immutable { stats, .. } => stats.count == 0,
        }
    }

    pub fn stats(&self) -> BlockStats {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            BlockState::Mutable(m) => m.stats,
            BlockState::Immutable { stats, .. } => *stats,
        }
    }

    /// Insert one revision (spec.md §4.2 `insert`): add to the sorted
    /// multiset, record it in the bloom filter, and fold it into the
    /// running stats. `BlockIndex` offsets are byte positions into the
    /// final serialized stream, so they are only knowable once the sorted
    /// order is fixed — they are computed during `sync()` in a single pass
    /// over the multiset (grounded on the teacher's `write_data_blocks`,
    /// which likewise builds its index while writing, not during insert).
    pub fn insert(
        &self,
        locator: B::Locator,
        key: B::Key,
        value: B::Value,
        version: i64,
        action: Action,
    ) -> Result<(), BlockError> {
        let revision = Revision::new(locator, key, value, version, action);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let BlockState::Mutable(m) = &mut *state else {
            return Err(BlockError::MalformedBlock("insert on immutable block".into()));
        };

        let full = revision.full_composite()?;
        m.bloom.insert(&full);

        let pos = m.revisions.binary_search(&revision).unwrap_or_else(|p| p);
        let encoded = crate::encoding::encode_to_vec(&revision)?;
        m.stats.observe(revision.version, &encoded);
        m.revisions.insert(pos, revision);
        Ok(())
    }

    /// Serialize revisions, bloom filter, index, and stats atomically
    /// (spec.md §4.2: "all four files share the same id; presence of all
    /// four is required at load time"), then become immutable.
    pub fn sync(&self) -> Result<(), BlockError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut m = match &*state {
            BlockState::Mutable(_) => {
                let BlockState::Mutable(m) = std::mem::replace(
                    &mut *state,
                    BlockState::Mutable(MutableState {
                        revisions: Vec::new(),
                        bloom: BloomFilter::new(1, 0.01)?,
                        index: BlockIndex::new(),
                        stats: BlockStats::new(),
                    }),
                ) else {
                    unreachable!()
                };
                m
            }
            BlockState::Immutable { .. } => return Ok(()),
        };

        let data_tmp = data_path(&self.dir, self.id).with_extension("tmp");
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&data_tmp)?;
        let mut running_offset: i64 = 0;
        for revision in &m.revisions {
            let encoded = crate::encoding::encode_to_vec(revision)?;
            let start = i32::try_from(running_offset)
                .map_err(|_| BlockError::MalformedBlock("block exceeds 2 GiB".into()))?;
            // The single index file carries entries for both granularities
            // the spec names: `Composite(locator)` (for locator-only
            // enumeration) and `Composite(locator, key)` (the point lookup
            // `seek` uses) — kept in one map so the block still has
            // exactly the four files its load-time failure mode expects.
            let loc = revision.locator_composite()?;
            m.index.put_start(loc.clone(), start)?;
            m.index.put_end(&loc, start)?;

            let loc_key = revision.locator_key_composite()?;
            m.index.put_start(loc_key.clone(), start)?;
            m.index.put_end(&loc_key, start)?;
            file.write_all(&encoded)?;
            running_offset += encoded.len() as i64;
        }
        file.sync_all()?;
        drop(file);
        fs::rename(&data_tmp, data_path(&self.dir, self.id))?;

        let bloom_tmp = bloom_path(&self.dir, self.id).with_extension("tmp");
        fs::write(&bloom_tmp, m.bloom.to_bytes())?;
        fs::rename(&bloom_tmp, bloom_path(&self.dir, self.id))?;

        m.index.sync(&index_path(&self.dir, self.id))?;

        let stats_tmp = stats_path(&self.dir, self.id).with_extension("tmp");
        let stats_bytes = crate::encoding::encode_to_vec(&m.stats)?;
        fs::write(&stats_tmp, stats_bytes)?;
        fs::rename(&stats_tmp, stats_path(&self.dir, self.id))?;

        let file = File::open(data_path(&self.dir, self.id))?;
        let mmap = unsafe { Mmap::map(&file)? };

        *state = BlockState::Immutable {
            mmap,
            bloom: m.bloom,
            index: std::mem::replace(&mut m.index, BlockIndex::new()),
            stats: m.stats,
        };
        Ok(())
    }

    /// Load a previously synced block. Fails with `MalformedBlock` if any
    /// of the four files is missing or unreadable (spec.md §4.2, §7).
    pub fn open(dir: &Path, id: u64) -> Result<Self, BlockError> {
        let data = data_path(dir, id);
        let bloom_file = bloom_path(dir, id);
        let index_file = index_path(dir, id);
        let stats_file = stats_path(dir, id);

        for path in [&data, &bloom_file, &index_file, &stats_file] {
            if !path.exists() {
                return Err(BlockError::MalformedBlock(format!("missing file {}", path.display())));
            }
        }

        let file = File::open(&data)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let bloom_bytes = fs::read(&bloom_file)?;
        let bloom = BloomFilter::from_bytes(&bloom_bytes)?;
        let stats_bytes = fs::read(&stats_file)?;
        let (stats, _) = BlockStats::decode_from(&stats_bytes)?;
        let index = BlockIndex::open(&index_file);

        Ok(Self {
            id,
            dir: dir.to_path_buf(),
            state: Mutex::new(BlockState::Immutable { mmap, bloom, index, stats }),
        })
    }

    /// Probe the bloom filter, consult the index, and decode the matching
    /// byte range into `sink` (spec.md §4.2 `seek`). A negative bloom or a
    /// missing index entry returns immediately with no revisions absorbed.
    pub fn seek(&self, composite: &Composite, sink: &mut dyn RevisionSink<B>) -> Result<(), BlockError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (bytes, index): (&[u8], &BlockIndex) = match &*state {
            BlockState::Mutable(m) => {
                for revision in &m.revisions {
                    let rev_composite = revision.locator_key_composite()?;
                    if &rev_composite == composite {
                        sink.absorb(revision.clone());
                    }
                }
                return Ok(());
            }
            BlockState::Immutable { mmap, index, .. } => (&mmap[..], index),
        };

        let (start, end) = index.get(composite)?;
        if start == NO_ENTRY || end == NO_ENTRY {
            return Ok(());
        }
        // `end` is the start offset of the last matching revision; keep
        // decoding while the next revision still starts at or before it.
        let mut offset = start as usize;
        while offset <= end as usize && offset < bytes.len() {
            let (revision, consumed) = Revision::<B>::decode_from(&bytes[offset..])?;
            offset += consumed;
            sink.absorb(revision);
        }
        Ok(())
    }

    /// Like `seek`, but keyed on `Composite(locator)` alone — every
    /// revision ever recorded for `locator`, across all keys. Used by
    /// whole-record operations (`audit`/`describe`) rather than point
    /// lookups.
    pub fn seek_locator(&self, locator: &B::Locator, sink: &mut dyn RevisionSink<B>) -> Result<(), BlockError> {
        let composite = Composite::builder().add(locator).map(|b| b.build())?;
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (bytes, index): (&[u8], &BlockIndex) = match &*state {
            BlockState::Mutable(m) => {
                for revision in &m.revisions {
                    if revision.locator_composite()? == composite {
                        sink.absorb(revision.clone());
                    }
                }
                return Ok(());
            }
            BlockState::Immutable { mmap, index, .. } => (&mmap[..], index),
        };

        let (start, end) = index.get(&composite)?;
        if start == NO_ENTRY || end == NO_ENTRY {
            return Ok(());
        }
        let mut offset = start as usize;
        while offset <= end as usize && offset < bytes.len() {
            let (revision, consumed) = Revision::<B>::decode_from(&bytes[offset..])?;
            offset += consumed;
            sink.absorb(revision);
        }
        Ok(())
    }

    /// `true` if the bloom filter says `composite` might be present.
    pub fn might_contain(&self, composite: &Composite) -> bool {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            BlockState::Mutable(m) => m.bloom.might_contain(composite),
            BlockState::Immutable { bloom, .. } => bloom.might_contain(composite),
        }
    }
}
