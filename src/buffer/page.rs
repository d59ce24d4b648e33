//! A single memory-mapped, append-only page (spec.md §4.1).

use std::fs::OpenOptions;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use memmap2::MmapMut;

use super::BufferError;
use crate::encoding::{Decode, Encode};
use crate::value::{Composite, Identifier, Text};
use crate::write::Write;

const PAGE_MAGIC: [u8; 4] = *b"PAGE";
const PAGE_VERSION: u32 = 1;
const HEADER_LEN: u64 = 4 + 4 + 8; // magic + version + capacity
const SLOT_FILTER_LEN: usize = 4096;

struct SlotFilters {
    by_record: Vec<bool>,
    by_key: Vec<bool>,
    by_record_key: Vec<bool>,
}

impl SlotFilters {
    fn new() -> Self {
        Self {
            by_record: vec![false; SLOT_FILTER_LEN],
            by_key: vec![false; SLOT_FILTER_LEN],
            by_record_key: vec![false; SLOT_FILTER_LEN],
        }
    }

    fn mark(&mut self, record: Identifier, key: &Text) {
        self.by_record[slot_hash(&record) % SLOT_FILTER_LEN] = true;
        self.by_key[slot_hash(&key.as_str()) % SLOT_FILTER_LEN] = true;
        self.by_record_key[slot_hash(&(record, key.as_str())) % SLOT_FILTER_LEN] = true;
    }

    fn might_contain_record(&self, record: &Identifier) -> bool {
        self.by_record[slot_hash(record) % SLOT_FILTER_LEN]
    }

    fn might_contain_key(&self, key: &str) -> bool {
        self.by_key[slot_hash(&key) % SLOT_FILTER_LEN]
    }

    fn might_contain_record_key(&self, record: &Identifier, key: &str) -> bool {
        self.by_record_key[slot_hash(&(*record, key)) % SLOT_FILTER_LEN]
    }
}

fn slot_hash<T: Hash>(v: &T) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    v.hash(&mut hasher);
    hasher.finish() as usize
}

struct PageInner {
    mmap: MmapMut,
    size: u64,
    head: u64,
}

/// A fixed-capacity, memory-mapped append log holding pending [`Write`]s.
pub struct Page {
    path: PathBuf,
    id: u64,
    capacity: u64,
    state: RwLock<PageInner>,
    bloom: Mutex<Bloom<Vec<u8>>>,
    slots: Mutex<SlotFilters>,
}

fn new_bloom(expected_items: usize) -> Result<Bloom<Vec<u8>>, BufferError> {
    Bloom::new_for_fp_rate(expected_items.max(64), 0.01)
        .map_err(|e| BufferError::Encoding(crate::encoding::EncodingError::Custom(e.to_string())))
}

impl Page {
    /// Create a brand-new page file of exactly `capacity` bytes.
    pub fn create(path: &Path, capacity: u64) -> Result<Self, BufferError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(HEADER_LEN + capacity)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        mmap[0..4].copy_from_slice(&PAGE_MAGIC);
        mmap[4..8].copy_from_slice(&PAGE_VERSION.to_be_bytes());
        mmap[8..16].copy_from_slice(&capacity.to_be_bytes());
        mmap.flush()?;

        Ok(Self {
            path: path.to_path_buf(),
            id: page_id_from_path(path),
            capacity,
            state: RwLock::new(PageInner { mmap, size: 0, head: 0 }),
            bloom: Mutex::new(new_bloom(1024)?),
            slots: Mutex::new(SlotFilters::new()),
        })
    }

    /// Re-open an existing page file, scanning forward to find the valid
    /// append offset (the first malformed or truncated frame ends the
    /// scan — a torn write from a crash mid-append).
    pub fn open(path: &Path) -> Result<Self, BufferError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        if mmap.len() < HEADER_LEN as usize || &mmap[0..4] != &PAGE_MAGIC[..] {
            return Err(BufferError::InvalidHeader(path.to_path_buf()));
        }
        let capacity = u64::from_be_bytes(mmap[8..16].try_into().unwrap_or([0; 8]));

        let mut size = 0u64;
        let writes = scan_writes(&mmap[HEADER_LEN as usize..]);
        let bloom = Mutex::new(new_bloom(writes.len().max(64))?);
        let slots = Mutex::new(SlotFilters::new());
        for (write, frame_len) in &writes {
            index_write(&bloom, &slots, write);
            size += *frame_len as u64;
        }
        mmap.flush()?;

        Ok(Self {
            path: path.to_path_buf(),
            id: page_id_from_path(path),
            capacity,
            state: RwLock::new(PageInner { mmap, size, head: 0 }),
            bloom,
            slots,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().unwrap_or_else(|e| e.into_inner()).size == 0
    }

    fn remaining(&self, inner: &PageInner) -> u64 {
        self.capacity.saturating_sub(inner.size)
    }

    /// Append `write`, indexing it in the per-page bloom/slot filters and
    /// (if `sync`) fsyncing the mapping (spec.md §4.1 `insert`).
    pub fn insert(&self, write: &Write, sync: bool) -> Result<(), BufferError> {
        let data = crate::encoding::encode_to_vec(write)?;
        let frame_len = 4u64 + data.len() as u64 + 4;

        let mut inner = self.state.write().unwrap_or_else(|e| e.into_inner());
        let remaining = self.remaining(&inner);
        if remaining < frame_len {
            return Err(BufferError::CapacityExceeded {
                needed: frame_len,
                available: remaining,
            });
        }

        write_frame(&mut inner.mmap, HEADER_LEN + inner.size, &data);
        inner.size += frame_len;

        index_write(&self.bloom, &self.slots, write);

        if sync {
            inner.mmap.flush()?;
        }
        Ok(())
    }

    /// Corner case (spec.md §4.1 step 3): remap an empty page to exactly
    /// fit a single oversized write.
    pub fn remap_to_fit(&self, needed: u64) -> Result<(), BufferError> {
        let mut inner = self.state.write().unwrap_or_else(|e| e.into_inner());
        debug_assert_eq!(inner.size, 0);

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.set_len(HEADER_LEN + needed)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        mmap[8..16].copy_from_slice(&needed.to_be_bytes());
        mmap.flush()?;
        inner.mmap = mmap;
        Ok(())
    }

    /// Fsync the page's mapped region.
    pub fn sync(&self) -> Result<(), BufferError> {
        let inner = self.state.read().unwrap_or_else(|e| e.into_inner());
        inner.mmap.flush()?;
        Ok(())
    }

    pub fn might_contain_record(&self, record: &Identifier) -> bool {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).might_contain_record(record)
    }

    pub fn might_contain_key(&self, key: &str) -> bool {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).might_contain_key(key)
    }

    pub fn might_contain_record_key(&self, record: &Identifier, key: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .might_contain_record_key(record, key)
    }

    /// Bloom-filter membership test over the full `(record, key, value)`
    /// triple, used by `BufferIterFilter::EqualWrite` to skip pages that
    /// provably cannot hold an exact match.
    pub fn might_contain_write(&self, write: &Write) -> bool {
        let composite = Composite::builder()
            .add(&write.record)
            .and_then(|b| b.add(&write.key))
            .and_then(|b| b.add(&write.value))
            .map(|b| b.build());
        match composite {
            Ok(composite) => self
                .bloom
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .check(&composite.into_bytes()),
            Err(_) => true,
        }
    }

    /// Attempt to acquire the page's write-lock for transport, mirroring
    /// spec.md §4.1's "try-write-lock the oldest page" — non-blocking, so
    /// a concurrent inserter or another transporter never stalls this call.
    pub fn try_write_lock(&self) -> Option<PageTransportGuard<'_>> {
        self.state.try_write().ok().map(|guard| PageTransportGuard { guard })
    }

    /// Block until the page's read-lock is free, for a [`SeekingIterator`]
    /// handing its lock chain forward onto this page (spec.md §4.1).
    pub(super) fn read_lock(&self) -> PageReadGuard<'_> {
        PageReadGuard {
            guard: self.state.read().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Non-blocking read-lock attempt, used only to decide whether a
    /// seeking iterator should wait-and-reseed before committing to the
    /// head page (spec.md §4.1).
    pub(super) fn try_read_lock(&self) -> Option<PageReadGuard<'_>> {
        self.state.try_read().ok().map(|guard| PageReadGuard { guard })
    }
}

/// Held by a [`SeekingIterator`] while it has a page's pending region
/// locked against concurrent transport.
pub struct PageReadGuard<'a> {
    guard: RwLockReadGuard<'a, PageInner>,
}

impl PageReadGuard<'_> {
    /// Decode every pending write in `[head, size)` under the held lock.
    pub fn pending(&self) -> Vec<Write> {
        let region = &self.guard.mmap[(HEADER_LEN + self.guard.head) as usize..(HEADER_LEN + self.guard.size) as usize];
        scan_writes(region).into_iter().map(|(w, _)| w).collect()
    }
}

/// Held while a transporter drains pending writes from the oldest page.
pub struct PageTransportGuard<'a> {
    guard: RwLockWriteGuard<'a, PageInner>,
}

impl PageTransportGuard<'_> {
    /// Decode and return the next pending write without advancing `head`.
    pub fn next_pending(&self) -> Option<Write> {
        if self.guard.head >= self.guard.size {
            return None;
        }
        let start = (HEADER_LEN + self.guard.head) as usize;
        let (write, _) = read_frame(&self.guard.mmap[start..])?;
        Some(write)
    }

    /// Advance `head` past the write just returned by `next_pending`.
    pub fn advance_head(&mut self) {
        let start = (HEADER_LEN + self.guard.head) as usize;
        if let Some((_, frame_len)) = read_frame(&self.guard.mmap[start..]) {
            self.guard.head += frame_len as u64;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.guard.head >= self.guard.size
    }
}

fn write_frame(mmap: &mut MmapMut, offset: u64, data: &[u8]) {
    let mut hasher = Crc32::new();
    hasher.update(data);
    let crc = hasher.finalize();

    let off = offset as usize;
    let len = data.len() as u32;
    mmap[off..off + 4].copy_from_slice(&len.to_be_bytes());
    mmap[off + 4..off + 4 + data.len()].copy_from_slice(data);
    mmap[off + 4 + data.len()..off + 8 + data.len()].copy_from_slice(&crc.to_be_bytes());
}

/// Decode one `[len][data][crc]` frame starting at `buf[0]`. Returns
/// `(write, frame_len)`.
fn read_frame(buf: &[u8]) -> Option<(Write, usize)> {
    if buf.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes(buf[0..4].try_into().ok()?) as usize;
    if buf.len() < 8 + len {
        return None;
    }
    let data = &buf[4..4 + len];
    let expected_crc = u32::from_be_bytes(buf[4 + len..8 + len].try_into().ok()?);
    let mut hasher = Crc32::new();
    hasher.update(data);
    if hasher.finalize() != expected_crc {
        return None;
    }
    let (write, consumed) = Write::decode_from(data).ok()?;
    debug_assert_eq!(consumed, data.len());
    Some((write, 8 + len))
}

fn scan_writes(mut region: &[u8]) -> Vec<(Write, usize)> {
    let mut out = Vec::new();
    loop {
        match read_frame(region) {
            Some((write, frame_len)) => {
                out.push((write, frame_len));
                region = &region[frame_len..];
            }
            None => break,
        }
    }
    out
}

fn index_write(bloom: &Mutex<Bloom<Vec<u8>>>, slots: &Mutex<SlotFilters>, write: &Write) {
    let composite = Composite::builder()
        .add(&write.record)
        .and_then(|b| b.add(&write.key))
        .and_then(|b| b.add(&write.value))
        .map(|b| b.build());
    if let Ok(composite) = composite {
        bloom.lock().unwrap_or_else(|e| e.into_inner()).set(&composite.into_bytes());
    }
    slots.lock().unwrap_or_else(|e| e.into_inner()).mark(write.record, &write.key);
}

fn page_id_from_path(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
