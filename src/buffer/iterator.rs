//! Seeking iteration over pending writes across a Buffer's page chain
//! (spec.md §4.1 "Reader iterators").

use std::collections::VecDeque;
use std::sync::Arc;

use crate::value::{Identifier, Text};
use crate::write::Write;

use super::page::PageReadGuard;
use super::{Buffer, Page};

/// Filters a [`SeekingIterator`] can apply while scanning pending writes.
#[derive(Debug, Clone)]
pub enum BufferIterFilter {
    All,
    Record(Identifier),
    Key(Text),
    RecordKey(Identifier, Text),
    EqualWrite(Write),
}

impl BufferIterFilter {
    /// Cheap pre-check against a page's bloom/slot filters, used to skip
    /// pages that provably cannot contain a match before paying for the
    /// full linear scan.
    fn might_match_page(&self, page: &Page) -> bool {
        match self {
            BufferIterFilter::All => true,
            BufferIterFilter::Record(record) => page.might_contain_record(record),
            BufferIterFilter::Key(key) => page.might_contain_key(key.as_str()),
            BufferIterFilter::RecordKey(record, key) => {
                page.might_contain_record_key(record, key.as_str())
            }
            BufferIterFilter::EqualWrite(write) => {
                page.might_contain_record_key(&write.record, write.key.as_str())
                    && page.might_contain_write(write)
            }
        }
    }

    fn matches(&self, write: &Write) -> bool {
        match self {
            BufferIterFilter::All => true,
            BufferIterFilter::Record(record) => &write.record == record,
            BufferIterFilter::Key(key) => &write.key == key,
            BufferIterFilter::RecordKey(record, key) => &write.record == record && &write.key == key,
            BufferIterFilter::EqualWrite(other) => write == other,
        }
    }
}

/// Iterates pending writes across a Buffer's pages, oldest page first.
///
/// Traverses pages in order, holding each page's read-lock until the next
/// page's read-lock has been acquired — releasing the previous one only
/// after the handoff succeeds, so a page can never be transported out
/// from under a reader mid-scan (spec.md §4.1). Slot/bloom filters let
/// the iterator skip whole pages that cannot contain a match without
/// decoding a single frame.
pub struct SeekingIterator<'a> {
    buffer: &'a Buffer,
    pages: VecDeque<Arc<Page>>,
    filter: BufferIterFilter,
    current: VecDeque<Write>,
    started: bool,
    // Safety: `held` borrows from `anchor`'s `RwLock`, which this struct
    // also owns. Declaring `held` before `anchor` guarantees it drops
    // first (struct fields drop in declaration order), and the two are
    // only ever written together in `lock_and_load`/cleared together in
    // `refill`, so `held` never outlives the `Arc<Page>` it points into.
    held: Option<PageReadGuard<'static>>,
    anchor: Option<Arc<Page>>,
}

impl<'a> SeekingIterator<'a> {
    pub(super) fn new(buffer: &'a Buffer, pages: Vec<Arc<Page>>, filter: BufferIterFilter) -> Self {
        Self {
            buffer,
            pages: pages.into_iter().collect(),
            filter,
            current: VecDeque::new(),
            started: false,
            held: None,
            anchor: None,
        }
    }

    fn snapshot_pages(&self) -> VecDeque<Arc<Page>> {
        self.buffer.pages.read().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
    }

    /// At the very start of iteration, confirm the head page can actually
    /// be locked before committing to it. If a transport currently holds
    /// its write-lock, wait on the buffer's transportable condvar and
    /// reseed from the (possibly changed) head of the page list rather
    /// than blocking on a page that may be removed by the time it frees
    /// up (spec.md §4.1).
    fn ensure_seeded(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        loop {
            let Some(head) = self.pages.front() else { return };
            if head.try_read_lock().is_some() {
                return;
            }
            let guard = self.buffer.transportable.lock().unwrap_or_else(|e| e.into_inner());
            let _unused = self
                .buffer
                .transportable_cv
                .wait_timeout(guard, std::time::Duration::from_millis(50))
                .unwrap_or_else(|e| e.into_inner());
            self.pages = self.snapshot_pages();
        }
    }

    /// Lock `page`, decode and filter its pending writes into `current`,
    /// and hold the guard — acquiring the new lock before dropping
    /// whatever page was previously held.
    fn lock_and_load(&mut self, page: Arc<Page>) {
        let guard = page.read_lock();
        // SAFETY: see the field comment on `held`/`anchor` above.
        let guard: PageReadGuard<'static> = unsafe { std::mem::transmute(guard) };
        self.current = guard.pending().into_iter().filter(|w| self.filter.matches(w)).collect();
        self.held = Some(guard);
        self.anchor = Some(page);
    }

    fn refill(&mut self) -> bool {
        self.ensure_seeded();
        loop {
            if !self.current.is_empty() {
                return true;
            }
            let Some(page) = self.pages.pop_front() else {
                self.held = None;
                self.anchor = None;
                return false;
            };
            if !self.filter.might_match_page(&page) {
                continue;
            }
            self.lock_and_load(page);
        }
    }
}

impl Iterator for SeekingIterator<'_> {
    type Item = Write;

    fn next(&mut self) -> Option<Write> {
        if self.current.is_empty() && !self.refill() {
            return None;
        }
        self.current.pop_front()
    }
}
