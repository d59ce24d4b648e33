//! The Buffer: an ordered list of memory-mapped, append-only [`Page`]s
//! that accept writes at high throughput and feed the downstream Segment
//! store (spec.md §4.1, C2).
//!
//! Grounded on the teacher's `wal` module — CRC-framed records, a
//! magic/version header, and an `Arc`-shared, lock-guarded file handle —
//! generalized from a plain `File` to a memory-mapped region per spec.md
//! §4.1's explicit requirement, and from a single log to a list of pages
//! with exactly one mutable "current" page.

mod iterator;
mod page;

pub use iterator::{BufferIterFilter, SeekingIterator};
pub use page::Page;

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::config::EngineConfig;
use crate::write::Write;

/// Extension used for on-disk page files (spec.md §6.1: `buffer/<timestamp>.buf`).
pub const PAGE_EXTENSION: &str = "buf";

/// Errors raised by the Buffer / Page subsystem.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] crate::encoding::EncodingError),

    /// Raised internally when a write cannot fit in the current page;
    /// caught by `Buffer::insert` to trigger page rotation. Never
    /// user-visible (spec.md §7).
    #[error("capacity exceeded: need {needed} bytes, {available} available")]
    CapacityExceeded { needed: u64, available: u64 },

    #[error("checksum mismatch in page {page_id} at offset {offset}")]
    ChecksumMismatch { page_id: u64, offset: u64 },

    #[error("malformed page header in {0}")]
    InvalidHeader(PathBuf),

    /// Bridges a [`TransportDestination`] failure that originates outside
    /// this module (e.g. `crate::database::Database`) without introducing
    /// an upward dependency here.
    #[error("downstream destination error: {0}")]
    Downstream(String),
}

/// Destination a Buffer transports pages into. Implemented by
/// [`crate::segment::Segment`] in this crate; kept as a trait so the
/// buffer module has no upward dependency on the segment module.
pub trait TransportDestination {
    fn accept(&self, write: &Write) -> Result<(), BufferError>;
    fn sync(&self) -> Result<(), BufferError>;
}

/// The ordered list of pages backing writes awaiting durable indexing.
pub struct Buffer {
    config: Arc<EngineConfig>,
    pages: RwLock<VecDeque<Arc<Page>>>,
    transportable: Mutex<()>,
    transportable_cv: Condvar,
}

impl Buffer {
    /// Open (creating if absent) the buffer rooted at `config.buffer_dir()`,
    /// loading any existing pages in filename (timestamp) order and
    /// appending one fresh current page if none is mutable.
    pub fn open(config: Arc<EngineConfig>) -> Result<Self, BufferError> {
        fs::create_dir_all(config.buffer_dir())?;

        let mut entries: Vec<PathBuf> = fs::read_dir(config.buffer_dir())?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(PAGE_EXTENSION))
            .collect();
        entries.sort();

        let mut pages = VecDeque::new();
        for path in entries {
            match Page::open(&path) {
                Ok(page) => pages.push_back(Arc::new(page)),
                Err(e) => {
                    tracing::warn!(?path, ?e, "skipping unreadable buffer page");
                }
            }
        }

        let buffer = Self {
            config,
            pages: RwLock::new(pages),
            transportable: Mutex::new(()),
            transportable_cv: Condvar::new(),
        };

        if buffer.current_page().is_none() {
            buffer.rotate()?;
        }

        Ok(buffer)
    }

    fn current_page(&self) -> Option<Arc<Page>> {
        self.pages.read().unwrap_or_else(|e| e.into_inner()).back().cloned()
    }

    fn next_page_path(&self) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self.config.buffer_dir().join(format!("{ts}.{PAGE_EXTENSION}"))
    }

    /// Allocate a fresh current page and enqueue the prior current page
    /// (if any) for transport. The new page becomes the sole mutable page.
    fn rotate(&self) -> Result<(), BufferError> {
        let path = self.next_page_path();
        let page = Page::create(&path, self.config.page_size)?;
        let mut pages = self.pages.write().unwrap_or_else(|e| e.into_inner());
        pages.push_back(Arc::new(page));
        drop(pages);
        self.notify_transportable();
        Ok(())
    }

    fn notify_transportable(&self) {
        let _guard = self.transportable.lock().unwrap_or_else(|e| e.into_inner());
        self.transportable_cv.notify_all();
    }

    /// Append `write` to the current page (spec.md §4.1 `insert`), rotating
    /// to a fresh page and retrying once if the current page lacks room.
    pub fn insert(&self, write: &Write, sync: bool) -> Result<(), BufferError> {
        loop {
            let page = match self.current_page() {
                Some(p) => p,
                None => {
                    self.rotate()?;
                    continue;
                }
            };

            match page.insert(write, sync) {
                Ok(()) => return Ok(()),
                Err(BufferError::CapacityExceeded { needed, available })
                    if page.is_empty() && needed > self.config.page_size =>
                {
                    // Corner case (spec.md §4.1 step 3): a single write
                    // exceeds the configured page size and the page is
                    // empty — remap to exactly that write's size.
                    page.remap_to_fit(needed)?;
                    continue;
                }
                Err(BufferError::CapacityExceeded { .. }) => {
                    self.rotate()?;
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Block while at most one page exists (spec.md §4.1
    /// `waitUntilTransportable`).
    pub fn wait_until_transportable(&self) {
        let guard = self.transportable.lock().unwrap_or_else(|e| e.into_inner());
        let _unused = self
            .transportable_cv
            .wait_while(guard, |_| self.pages.read().unwrap_or_else(|e| e.into_inner()).len() <= 1)
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Try to transport up to `count` pending writes from the oldest page
    /// into `destination` (spec.md §4.1 `transport`). Returns the number
    /// of writes handed off. Requires ≥ 2 pages so the current page always
    /// stays mutable.
    pub fn transport(
        &self,
        count: usize,
        destination: &dyn TransportDestination,
    ) -> Result<usize, BufferError> {
        let oldest = {
            let pages = self.pages.read().unwrap_or_else(|e| e.into_inner());
            if pages.len() < 2 {
                return Ok(0);
            }
            pages.front().cloned()
        };
        let Some(oldest) = oldest else { return Ok(0) };

        let Some(mut guard) = oldest.try_write_lock() else {
            return Ok(0);
        };

        let mut transported = 0;
        for _ in 0..count {
            match guard.next_pending() {
                Some(write) => {
                    destination.accept(&write)?;
                    guard.advance_head();
                    transported += 1;
                }
                None => break,
            }
        }

        let exhausted = guard.is_exhausted();
        drop(guard);

        if exhausted {
            destination.sync()?;
            let mut pages = self.pages.write().unwrap_or_else(|e| e.into_inner());
            if pages.front().map(|p| Arc::ptr_eq(p, &oldest)).unwrap_or(false) {
                pages.pop_front();
                let _ = fs::remove_file(oldest.path());
            }
        }

        Ok(transported)
    }

    /// Construct a seeking iterator over pending writes across all pages,
    /// filtered per `filter` (spec.md §4.1 "Reader iterators").
    pub fn iter(&self, filter: BufferIterFilter) -> SeekingIterator<'_> {
        let pages: Vec<Arc<Page>> = self
            .pages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        SeekingIterator::new(self, pages, filter)
    }

    pub fn page_count(&self) -> usize {
        self.pages.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Force an fsync of the current page's mapping and inventory.
    pub fn sync(&self) -> Result<(), BufferError> {
        if let Some(page) = self.current_page() {
            page.sync()?;
        }
        Ok(())
    }
}

pub(crate) fn is_page_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(PAGE_EXTENSION)
}
