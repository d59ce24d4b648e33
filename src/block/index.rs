//! `BlockIndex` — maps `Composite(locator)` / `Composite(locator,key)` to
//! `[startOffset, endOffset]` byte ranges into a block's revision stream
//! (spec.md §4.3).
//!
//! Grounded on the teacher's `sstable::mod::{BlockHandle, MetaIndexEntry}`
//! encode/decode style — plain fixed-width fields written with the
//! project's `Encode`/`Decode` traits, no external serialization crate.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use memmap2::Mmap;

use crate::cache::LruCache;
use crate::encoding::{Decode, Encode, EncodingError};
use crate::value::Composite;

use super::BlockError;

/// Sentinel written for an absent offset; never actually persisted since
/// only present composites get entries, but used as `getStart`/`getEnd`'s
/// not-found return value (spec.md §4.3).
pub const NO_ENTRY: i32 = -1;

enum State {
    Mutable(HashMap<Composite, (i32, i32)>),
    Immutable {
        path: PathBuf,
        /// Single-slot LRU standing in for the source's weak/soft-reference
        /// rehydration slot (spec.md §9: model as an explicit-eviction LRU,
        /// not a GC-observable weak reference).
        cached: LruCache<(), Arc<HashMap<Composite, (i32, i32)>>>,
    },
}

/// The offset index for a single block.
pub struct BlockIndex {
    state: Mutex<State>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Mutable(HashMap::new())),
        }
    }

    /// Record `composite`'s start offset if it has none yet (spec.md §4.3
    /// `putStart`: "creates an entry if absent").
    pub fn put_start(&self, composite: Composite, offset: i32) -> Result<(), BlockError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *state {
            State::Mutable(entries) => {
                entries.entry(composite).or_insert((offset, offset));
                Ok(())
            }
            State::Immutable { .. } => Err(BlockError::IndexImmutable),
        }
    }

    /// Update `composite`'s end offset. Requires an existing start entry
    /// (spec.md §4.3 `putEnd`: "requires an existing start (else fail — a
    /// malformed callsite)").
    pub fn put_end(&self, composite: &Composite, offset: i32) -> Result<(), BlockError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *state {
            State::Mutable(entries) => match entries.get_mut(composite) {
                Some(entry) => {
                    entry.1 = offset;
                    Ok(())
                }
                None => Err(BlockError::PutEndWithoutStart),
            },
            State::Immutable { .. } => Err(BlockError::IndexImmutable),
        }
    }

    /// `(start, end)` for `composite`, or `NO_ENTRY` for each if absent.
    pub fn get(&self, composite: &Composite) -> Result<(i32, i32), BlockError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *state {
            State::Mutable(entries) => {
                Ok(entries.get(composite).copied().unwrap_or((NO_ENTRY, NO_ENTRY)))
            }
            State::Immutable { path, cached } => {
                let map = match cached.get(&()) {
                    Some(map) => map,
                    None => {
                        let map = Arc::new(load_entries(path)?);
                        cached.put((), map.clone());
                        map
                    }
                };
                Ok(map.get(composite).copied().unwrap_or((NO_ENTRY, NO_ENTRY)))
            }
        }
    }

    /// Serialize all entries to `path` as `[entrySize:i32][start:i32]
    /// [end:i32][composite:bytes]` concatenated (spec.md §6.2), fsync, and
    /// transition to immutable.
    pub fn sync(&self, path: &Path) -> Result<(), BlockError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let entries = match &*state {
            State::Mutable(entries) => entries.clone(),
            State::Immutable { .. } => return Ok(()),
        };

        let tmp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut sorted: Vec<_> = entries.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        for (composite, (start, end)) in &sorted {
            let mut body = Vec::new();
            start.encode_to(&mut body)?;
            end.encode_to(&mut body)?;
            composite.encode_to(&mut body)?;

            let entry_size = i32::try_from(body.len())
                .map_err(|_| BlockError::Encoding(EncodingError::LengthOverflow(
                    "block index entry too large".into(),
                )))?;
            let mut frame = Vec::with_capacity(4 + body.len());
            entry_size.encode_to(&mut frame)?;
            frame.extend_from_slice(&body);
            file.write_all(&frame)?;
        }
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)?;

        *state = State::Immutable {
            path: path.to_path_buf(),
            cached: LruCache::new(1),
        };
        Ok(())
    }

    pub fn is_immutable(&self) -> bool {
        matches!(&*self.state.lock().unwrap_or_else(|e| e.into_inner()), State::Immutable { .. })
    }

    /// Re-open an already-synced index file without going through
    /// `sync` (used when loading a block from disk).
    pub fn open(path: &Path) -> Self {
        Self {
            state: Mutex::new(State::Immutable {
                path: path.to_path_buf(),
                cached: LruCache::new(1),
            }),
        }
    }
}

impl Default for BlockIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn load_entries(path: &Path) -> Result<HashMap<Composite, (i32, i32)>, BlockError> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let mut entries = HashMap::new();
    let mut offset = 0usize;

    while offset < mmap.len() {
        let (entry_size, n) = i32::decode_from(&mmap[offset..])?;
        offset += n;
        let entry_size = usize::try_from(entry_size)
            .map_err(|_| BlockError::MalformedBlock("negative block index entry size".into()))?;
        if offset + entry_size > mmap.len() {
            return Err(BlockError::MalformedBlock("truncated block index entry".into()));
        }
        let body = &mmap[offset..offset + entry_size];
        let (start, n1) = i32::decode_from(body)?;
        let (end, n2) = i32::decode_from(&body[n1..])?;
        let (composite, _) = Composite::decode_from(&body[n1 + n2..])?;
        entries.insert(composite, (start, end));
        offset += entry_size;
    }
    Ok(entries)
}
