//! # corpusdb
//!
//! An embeddable, persistent record store with three coupled views over
//! the same write stream: a per-record field table (Primary), an
//! inverted value index (Secondary), and a substring search index
//! (Corpus). Every mutation is a single [`write::Write`] — a
//! `(key, value, record, version)` tuple tagged ADD/REMOVE — buffered
//! durably before being transported into immutable, version-sorted
//! segments.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Database                           │
//! │  ┌────────────┐   transport   ┌─────────────────────┐    │
//! │  │   Buffer    │ ────────────► │   Segments (seg0 +   │    │
//! │  │ (mmap pages)│               │   closed, on disk)   │    │
//! │  └─────────────┘               └──────────┬──────────┘    │
//! │                                            │               │
//! │                      ┌─────────────────────┼────────────┐ │
//! │                      │        Block<Primary│Secondary   │ │
//! │                      │        |CorpusKind> per segment  │ │
//! │                      └────────────────────────────────────┘
//! │  record caches: primary-full, primary-partial, secondary  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`database`] | Orchestrator — segment registry, record caches, core API surface |
//! | [`buffer`] | Memory-mapped, append-only write buffer with background transport |
//! | [`segment`] | Immutable on-disk Primary/Secondary/Corpus block triple |
//! | [`block`] | Bloom-filtered, sorted revision index backing one view of one segment |
//! | [`record`] | In-memory present/history views (`TableRecord`/`IndexRecord`/`CorpusRecord`) |
//! | [`transaction`] | Backup-then-apply atomic multi-write operations with crash recovery |
//! | [`search`] | Substring tokenization, indexing, and scored query evaluation |
//! | [`value`] | Core value types: `Identifier`, `Text`, `Value`, `Composite`, `Operator` |
//! | [`write`] | The `Write` unit and its monotonic `VersionClock` |
//! | [`encoding`] | Length-prefixed binary `Encode`/`Decode` framing |
//! | [`config`] | Immutable `EngineConfig` and on-disk layout helpers |
//!
//! ## Key Features
//!
//! - **Durable buffered writes** — every `ingest(write, sync=true)` call
//!   survives a crash-restart before being transported into a segment.
//! - **Three coherent views per record** — field table, value index, and
//!   substring search, all derived from the same write stream.
//! - **Point-in-time queries** — `select`/`browse`/`verify` all accept an
//!   optional historical timestamp, replayed from per-key revision logs.
//! - **Atomic multi-write operations** — [`transaction::Transaction`]
//!   stages writes and backs them up before applying, so a crash mid-commit
//!   is recovered idempotently on reopen.
//! - **Soft-bounded record caches** — whole-record, single-field, and
//!   index caches, invalidated on write.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corpusdb::config::EngineConfig;
//! use corpusdb::database::Database;
//! use corpusdb::value::{Action, Identifier, Text, Value};
//! use corpusdb::write::Write;
//!
//! let config = EngineConfig::new("/tmp/my_db");
//! let db = Database::open(config).unwrap();
//! db.start().unwrap();
//!
//! let write = Write::new(Action::Add, Text::new("name"), Value::String("ada".into()), Identifier::new(1), db.next_version());
//! db.ingest(&write, true).unwrap();
//!
//! db.stop().unwrap();
//! ```

#![allow(dead_code)]

pub mod block;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod database;
pub mod encoding;
pub mod record;
pub mod search;
pub mod segment;
pub mod transaction;
pub mod value;
pub mod write;
