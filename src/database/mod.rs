//! Database: the top-level orchestrator tying the Buffer, Segment store,
//! and the three record views together (spec.md §4.8, §6.4).
//!
//! Grounded on the teacher's `engine::Engine`/`EngineInner` split: a thin,
//! cheaply-`Clone`-able handle (`Database`) wrapping an `Arc`-shared inner
//! struct (`DatabaseInner`), generalized from a single LSM KV engine to the
//! three-view (Primary/Secondary/Corpus) registry this crate implements.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::block::CompactRevision;
use crate::buffer::{Buffer, BufferError, TransportDestination};
use crate::cache::LruCache;
use crate::config::EngineConfig;
use crate::encoding::{self, EncodingError};
use crate::record::{CorpusRecord, ExploreError, IndexRecord, TableRecord};
use crate::segment::{self, Segment, SegmentError};
use crate::transaction::{self, TransactionError, TransactionTarget};
use crate::value::{Action, Composite, Identifier, Operator, Text, Value};
use crate::write::{VersionClock, Write};

/// Errors raised by the Database orchestration layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    #[error("block error: {0}")]
    Block(#[from] crate::block::BlockError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("explore error: {0}")]
    Explore(#[from] ExploreError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Bridges a [`DatabaseError`] back across the [`TransportDestination`] and
/// [`TransactionTarget`] trait boundaries (`buffer`/`transaction` only know
/// about their own error types; both carry a `Downstream(String)` variant
/// for exactly this purpose, per spec.md §7's "propagated as runtime
/// failures" policy).
impl From<DatabaseError> for BufferError {
    fn from(e: DatabaseError) -> Self {
        BufferError::Downstream(e.to_string())
    }
}

impl From<DatabaseError> for TransactionError {
    fn from(e: DatabaseError) -> Self {
        TransactionError::Downstream(e.to_string())
    }
}

struct DatabaseState {
    segments: Vec<Segment>,
    seg0: Segment,
}

fn segments_oldest_to_newest(state: &DatabaseState) -> impl Iterator<Item = &Segment> {
    state.segments.iter().chain(std::iter::once(&state.seg0))
}

struct DatabaseInner {
    config: Arc<EngineConfig>,
    buffer: Buffer,
    state: RwLock<DatabaseState>,
    inventory: Mutex<HashSet<Identifier>>,

    /// Three soft-bounded record caches (spec.md §4.8): whole-record
    /// Primary views, single-field Primary views, and whole Secondary
    /// views. Corpus records are deliberately never cached.
    primary_full_cache: LruCache<Identifier, Arc<TableRecord>>,
    primary_partial_cache: LruCache<Composite, Arc<TableRecord>>,
    secondary_cache: LruCache<Text, Arc<IndexRecord>>,

    next_segment_id: AtomicU64,
    /// Set once the first `accept` call's verification warmup has run
    /// (spec.md §4.8); every subsequent call skips the check.
    verification_warmed: AtomicBool,
    running: AtomicBool,
    version_clock: VersionClock,
    transport_thread: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to an open database. Cheap to `Clone` — every clone shares the
/// same underlying state via `Arc`.
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl Database {
    /// Open (or create) a database rooted at `config.root`: loads and
    /// resolves existing segments, allocates a fresh `seg0`, opens the
    /// Buffer, loads the record inventory, and replays any pending
    /// transaction backups (spec.md §4.8, §4.9).
    pub fn open(config: EngineConfig) -> Result<Self, DatabaseError> {
        crate::config::ensure_layout(&config)?;
        let record_cache_capacity = config.record_cache_capacity;
        let config = Arc::new(config);

        let mut loaded = Vec::new();
        let mut max_id = 0u64;
        if let Ok(entries) = fs::read_dir(config.segments_dir()) {
            for entry in entries.filter_map(|e| e.ok()) {
                let Some(id) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) else {
                    continue;
                };
                max_id = max_id.max(id);
                match Segment::open(&config.segments_dir(), id) {
                    Ok(segment) => loaded.push(segment),
                    Err(e) => warn!(id, %e, "skipping segment that failed to load"),
                }
            }
        }
        let segments = segment::resolve_overlaps(loaded)?;

        let seg0_id = max_id + 1;
        let seg0 = Segment::create(&config.segments_dir(), seg0_id, &config)?;

        let buffer = Buffer::open(Arc::clone(&config))?;
        let inventory = load_inventory(&config.inventory_file())?;

        let database = Self {
            inner: Arc::new(DatabaseInner {
                config,
                buffer,
                state: RwLock::new(DatabaseState { segments, seg0 }),
                inventory: Mutex::new(inventory),
                primary_full_cache: LruCache::new(record_cache_capacity),
                primary_partial_cache: LruCache::new(record_cache_capacity),
                secondary_cache: LruCache::new(record_cache_capacity),
                next_segment_id: AtomicU64::new(seg0_id + 1),
                verification_warmed: AtomicBool::new(false),
                running: AtomicBool::new(false),
                version_clock: VersionClock::new(),
                transport_thread: Mutex::new(None),
            }),
        };

        let recovered = transaction::recover(&database.inner.config.transaction_dir(), &database)?;
        if recovered > 0 {
            info!(recovered, "replayed transaction backups during recovery");
        }

        Ok(database)
    }

    /// A strictly increasing commit version (spec.md §3.2), for callers
    /// assembling a [`Write`].
    pub fn next_version(&self) -> i64 {
        self.inner.version_clock.next()
    }

    // --------------------------------------------------------------
    // Ingest (spec.md §6.4 `accept(write[, sync])` — the buffer's durable
    // write path. Named `ingest` here, not `accept`, because `Database`
    // separately implements `TransportDestination::accept` for the
    // buffer-to-segment transfer step (spec.md §4.8); the two are distinct
    // operations that happen to share a name in the spec's glossary.
    // --------------------------------------------------------------

    /// Append `write` to the buffer (spec.md §4.1 `insert`). Durable once
    /// this returns if `sync` is set.
    pub fn ingest(&self, write: &Write, sync: bool) -> Result<(), DatabaseError> {
        Ok(self.inner.buffer.insert(write, sync)?)
    }

    /// Manually drain up to `count` pending writes from the oldest buffer
    /// page into this database, without running the background transport
    /// loop (`start`/`stop`). Returns the number transported.
    pub fn drain_buffer(&self, count: usize) -> Result<usize, DatabaseError> {
        Ok(self.inner.buffer.transport(count, self)?)
    }

    /// Compare `write` against already-durable segment state to detect a
    /// double-transport of a crash-residual buffer page (spec.md §4.8).
    /// Returns `false` if `write` looks like a duplicate that should be
    /// dropped rather than replayed.
    fn verify_warmup(&self, write: &Write) -> Result<bool, DatabaseError> {
        let table = self.load_table_partial(write.record, &write.key)?;
        let already_present = table.fetch(&write.key).contains(&write.value);
        let duplicate = match write.action {
            Action::Add => already_present,
            Action::Remove => !already_present,
            Action::Compare => false,
        };
        Ok(!duplicate)
    }

    /// Transfer `write` into `seg0`, update the inventory, and invalidate
    /// whatever cached records overlap its composite (spec.md §4.8). Shared
    /// by both the transport-destination `accept` path and transaction
    /// recovery's `apply(sync_and_verify=true)` path.
    fn transfer_write(&self, write: &Write) -> Result<(), DatabaseError> {
        {
            let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
            state.seg0.transfer(write, &self.inner.config)?;
        }
        self.inner.inventory.lock().unwrap_or_else(|e| e.into_inner()).insert(write.record);
        self.invalidate_caches(write);
        Ok(())
    }

    fn invalidate_caches(&self, write: &Write) {
        self.inner.primary_full_cache.invalidate(&write.record);
        if let Ok(partial_key) = Composite::builder().add(&write.record).and_then(|b| b.add(&write.key)).map(|b| b.build()) {
            self.inner.primary_partial_cache.invalidate(&partial_key);
        }
        self.inner.secondary_cache.invalidate(&write.key);
    }

    fn accept_into_segment(&self, write: &Write) -> Result<(), DatabaseError> {
        let needs_warmup = !self.inner.verification_warmed.swap(true, AtomicOrdering::AcqRel);
        if needs_warmup && !self.verify_warmup(write)? {
            warn!(record = write.record.0, "dropping double-transported write detected during verification warmup");
            return Ok(());
        }
        self.transfer_write(write)
    }

    // --------------------------------------------------------------
    // Record lookups (shared cache-populate-on-miss helpers)
    // --------------------------------------------------------------

    fn load_table_full(&self, record: Identifier) -> Result<Arc<TableRecord>, DatabaseError> {
        if let Some(hit) = self.inner.primary_full_cache.get(&record) {
            return Ok(hit);
        }
        let mut table = TableRecord::new(record);
        {
            let state = self.inner.state.read().unwrap_or_else(|e| e.into_inner());
            for segment in segments_oldest_to_newest(&state) {
                segment.primary().seek_locator(&record, table.inner_mut())?;
            }
        }
        let table = Arc::new(table);
        self.inner.primary_full_cache.put(record, Arc::clone(&table));
        Ok(table)
    }

    fn load_table_partial(&self, record: Identifier, key: &Text) -> Result<Arc<TableRecord>, DatabaseError> {
        let cache_key = Composite::builder().add(&record)?.add(key)?.build();
        if let Some(hit) = self.inner.primary_partial_cache.get(&cache_key) {
            return Ok(hit);
        }
        let mut table = TableRecord::restricted(record, key.clone());
        let point = Composite::builder().add(&record)?.add(key)?.build();
        {
            let state = self.inner.state.read().unwrap_or_else(|e| e.into_inner());
            for segment in segments_oldest_to_newest(&state) {
                segment.primary().seek(&point, table.inner_mut())?;
            }
        }
        let table = Arc::new(table);
        self.inner.primary_partial_cache.put(cache_key, Arc::clone(&table));
        Ok(table)
    }

    fn load_index(&self, key: &Text) -> Result<Arc<IndexRecord>, DatabaseError> {
        if let Some(hit) = self.inner.secondary_cache.get(key) {
            return Ok(hit);
        }
        let mut index = IndexRecord::new(key.clone());
        {
            let state = self.inner.state.read().unwrap_or_else(|e| e.into_inner());
            for segment in segments_oldest_to_newest(&state) {
                segment.secondary().seek_locator(key, index.inner_mut())?;
            }
        }
        let index = Arc::new(index);
        self.inner.secondary_cache.put(key.clone(), Arc::clone(&index));
        Ok(index)
    }

    /// Never cached (spec.md §4.7/§4.8: "corpus records are never cached").
    fn load_corpus(&self, key: &Text) -> Result<CorpusRecord, DatabaseError> {
        let mut corpus = CorpusRecord::new(key.clone());
        let state = self.inner.state.read().unwrap_or_else(|e| e.into_inner());
        for segment in segments_oldest_to_newest(&state) {
            if let Some(block) = segment.corpus() {
                block.seek_locator(key, corpus.inner_mut())?;
            }
        }
        Ok(corpus)
    }

    // --------------------------------------------------------------
    // Core API surface (spec.md §6.4)
    // --------------------------------------------------------------

    pub fn verify(&self, key: &Text, value: &Value, record: Identifier, timestamp: Option<i64>) -> Result<bool, DatabaseError> {
        let table = self.load_table_partial(record, key)?;
        Ok(table.verify(key, value, timestamp))
    }

    /// `select(record[, timestamp])`: every field's present-value set.
    pub fn select_record(&self, record: Identifier, timestamp: Option<i64>) -> Result<BTreeMap<Text, BTreeSet<Value>>, DatabaseError> {
        let table = self.load_table_full(record)?;
        Ok(match timestamp {
            Some(ts) => table.describe_at(ts),
            None => table.describe().clone(),
        })
    }

    /// `select(key, record[, timestamp])`: one field's present-value set.
    pub fn select(&self, key: &Text, record: Identifier, timestamp: Option<i64>) -> Result<BTreeSet<Value>, DatabaseError> {
        let table = self.load_table_partial(record, key)?;
        Ok(match timestamp {
            Some(ts) => table.fetch_at(key, ts),
            None => table.fetch(key),
        })
    }

    pub fn browse(&self, key: &Text, timestamp: Option<i64>) -> Result<BTreeMap<Value, BTreeSet<Identifier>>, DatabaseError> {
        let index = self.load_index(key)?;
        Ok(match timestamp {
            Some(ts) => index.browse_at(ts),
            None => index.browse().clone(),
        })
    }

    pub fn explore(&self, key: &Text, operator: Operator, values: &[Value], timestamp: Option<i64>) -> Result<BTreeMap<Value, BTreeSet<Identifier>>, DatabaseError> {
        let index = self.load_index(key)?;
        Ok(index.explore(operator, values, timestamp)?)
    }

    /// `chronologize(key, record, start, end)`: the accumulated
    /// present-value set after every revision in `[start, end]`, keyed by
    /// version (spec.md §8.2 Scenario 5).
    pub fn chronologize(&self, key: &Text, record: Identifier, start: i64, end: i64) -> Result<BTreeMap<i64, BTreeSet<Value>>, DatabaseError> {
        let table = self.load_table_partial(record, key)?;
        Ok(table.chronologize(key, start, end))
    }

    /// `review(key, record)`: full version history of one field.
    pub fn review(&self, key: &Text, record: Identifier) -> Result<Vec<CompactRevision<Value>>, DatabaseError> {
        let table = self.load_table_partial(record, key)?;
        Ok(table.audit(key).to_vec())
    }

    /// `review(record)`: full version history of every field ever written
    /// for `record`.
    pub fn review_record(&self, record: Identifier) -> Result<BTreeMap<Text, Vec<CompactRevision<Value>>>, DatabaseError> {
        let table = self.load_table_full(record)?;
        let mut out = BTreeMap::new();
        for field in table.known_fields() {
            out.insert(field.clone(), table.audit(&field).to_vec());
        }
        Ok(out)
    }

    pub fn search(&self, key: &Text, query: &str) -> Result<Vec<(Identifier, usize)>, DatabaseError> {
        let corpus = self.load_corpus(key)?;
        Ok(corpus.search(query, &self.inner.config))
    }

    /// `contains(record)`: a fast inventory check, not a whole-record load.
    pub fn contains(&self, record: Identifier) -> Result<bool, DatabaseError> {
        Ok(self.inner.inventory.lock().unwrap_or_else(|e| e.into_inner()).contains(&record))
    }

    /// `triggerSync(flush)` (spec.md §4.8): under the master write lock, if
    /// `flush` and `seg0` carries data, fsync it to `segments/<id>/`, then
    /// allocate a fresh `seg0` and append the closed one to the segments
    /// list. Always persists the record inventory.
    pub fn trigger_sync(&self, flush: bool) -> Result<(), DatabaseError> {
        {
            let mut state = self.inner.state.write().unwrap_or_else(|e| e.into_inner());
            if flush && !state.seg0.primary().is_empty() {
                state.seg0.sync()?;
                let id = self.inner.next_segment_id.fetch_add(1, AtomicOrdering::SeqCst);
                let fresh = Segment::create(&self.inner.config.segments_dir(), id, &self.inner.config)?;
                let closed = std::mem::replace(&mut state.seg0, fresh);
                state.segments.push(closed);
            }
        }
        self.persist_inventory()
    }

    /// `sync()`: equivalent to `trigger_sync(true)`.
    pub fn sync(&self) -> Result<(), DatabaseError> {
        self.trigger_sync(true)
    }

    fn persist_inventory(&self) -> Result<(), DatabaseError> {
        let ids: Vec<Identifier> = self.inner.inventory.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect();
        let mut bytes = Vec::new();
        encoding::encode_vec(&ids, &mut bytes)?;
        let path = self.inner.config.inventory_file();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Start the background transport loop that drains the Buffer into
    /// this database. Idempotent — a second call while already running is
    /// a no-op.
    pub fn start(&self) -> Result<(), DatabaseError> {
        if self.inner.running.swap(true, AtomicOrdering::AcqRel) {
            return Ok(());
        }
        let worker = self.clone();
        let handle = std::thread::Builder::new()
            .name("corpusdb-transport".to_string())
            .spawn(move || worker.run_transport_loop())
            .map_err(DatabaseError::Io)?;
        *self.inner.transport_thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Stop the background transport loop and join its thread.
    pub fn stop(&self) -> Result<(), DatabaseError> {
        self.inner.running.store(false, AtomicOrdering::Release);
        let handle = self.inner.transport_thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| DatabaseError::Internal("transport thread panicked".to_string()))?;
        }
        Ok(())
    }

    /// Polls the buffer for transportable pages rather than blocking on
    /// `Buffer::wait_until_transportable`, so `stop()` can observe the
    /// `running` flag promptly instead of waiting on a condvar with no
    /// cancellation hook.
    fn run_transport_loop(self) {
        const BATCH: usize = 64;
        const IDLE_POLL: Duration = Duration::from_millis(20);
        while self.inner.running.load(AtomicOrdering::Acquire) {
            match self.inner.buffer.transport(BATCH, &self) {
                Ok(0) => std::thread::sleep(IDLE_POLL),
                Ok(_) => {}
                Err(e) => {
                    warn!(%e, "transport batch failed");
                    std::thread::sleep(IDLE_POLL);
                }
            }
        }
    }
}

impl TransportDestination for Database {
    /// Buffer-to-segment transfer (spec.md §4.8 `accept`), reached only via
    /// `&dyn TransportDestination` from `Buffer::transport` — distinct from
    /// the inherent `Database::ingest`, which is the buffer's write-side
    /// entry point.
    fn accept(&self, write: &Write) -> Result<(), BufferError> {
        Ok(self.accept_into_segment(write)?)
    }

    fn sync(&self) -> Result<(), BufferError> {
        Ok(self.trigger_sync(true)?)
    }
}

impl TransactionTarget for Database {
    fn apply(&self, write: &Write, sync_and_verify: bool) -> Result<(), TransactionError> {
        if sync_and_verify {
            let accepted = self.verify_warmup(write)?;
            if !accepted {
                return Ok(());
            }
        }
        Ok(self.transfer_write(write)?)
    }
}

fn load_inventory(path: &Path) -> Result<HashSet<Identifier>, DatabaseError> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let bytes = fs::read(path)?;
    let (ids, _) = encoding::decode_vec::<Identifier>(&bytes)?;
    Ok(ids.into_iter().collect())
}
