//! YCSB-style workload benchmarks for corpusdb.
//!
//! Reinterprets the classic Yahoo! Cloud Serving Benchmark workload mix
//! (A-F) in terms of corpusdb's record/field/value model: "read" becomes
//! `select`, "update" becomes a remove-then-add pair against an existing
//! field, "scan" becomes `explore` over the secondary index, and "insert"
//! becomes `ingest` of a fresh record.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench ycsb
//! cargo bench --bench ycsb -- workload_a
//! ```

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use corpusdb::config::EngineConfig;
use corpusdb::database::Database;
use corpusdb::value::{Action, Identifier, Operator, Text, Value};
use corpusdb::write::Write;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tempfile::TempDir;

const RECORD_COUNT: u64 = 10_000;
const OPS_PER_RUN: u64 = 5_000;
const VALUE_SIZE: usize = 256;
const EXPLORE_SPAN: i64 = 50;

const FIELD: &str = "payload";
const AGE_FIELD: &str = "age";

fn filler_value(seed: u64) -> String {
    let mut s = format!("v{seed:016}");
    s.push_str(&"x".repeat(VALUE_SIZE.saturating_sub(s.len())));
    s
}

/// Loads `RECORD_COUNT` records, each with a `payload` field and an
/// `age` secondary-indexed field, and fully drains the buffer so every
/// subsequent read/explore hits durable segment state.
fn load_database(dir: &std::path::Path) -> Database {
    let mut config = EngineConfig::new(dir);
    // Small enough that the buffer rotates pages repeatedly over the
    // course of the load, rather than holding all of it in one page that
    // `Buffer::transport` (which only ever drains an already-rotated-out
    // page) could never touch.
    config.page_size = 4096;
    let db = Database::open(config).unwrap();
    for i in 0..RECORD_COUNT {
        let payload = Write::new(Action::Add, Text::new(FIELD), Value::String(filler_value(i)), Identifier::new(i), i as i64 * 2 + 1);
        db.ingest(&payload, false).unwrap();
        let age = Write::new(Action::Add, Text::new(AGE_FIELD), Value::Int64((i % 100) as i64), Identifier::new(i), i as i64 * 2 + 2);
        db.ingest(&age, false).unwrap();
    }
    // Force the final page to rotate out so the last records aren't
    // left stranded in the still-mutable current page.
    let flush = Write::new(Action::Add, Text::new("__flush__"), Value::Int64(0), Identifier::new(u64::MAX), 0);
    db.ingest(&flush, false).unwrap();
    db.sync().unwrap();
    while db.drain_buffer(4096).unwrap() > 0 {}
    db
}

/// A crude skew toward low ids without pulling in a full zipfian crate:
/// square a uniform [0,1) draw so small values are denser.
fn zipfish_record(rng: &mut StdRng) -> Identifier {
    let u: f64 = rng.random();
    let skewed = u * u;
    Identifier::new((skewed * RECORD_COUNT as f64) as u64 % RECORD_COUNT)
}

/// Benchmark: pure record-insertion cost, the baseline every workload's
/// database is built from.
///
/// **Scenario:** Loads `RECORD_COUNT` fresh records from an empty database.
///
/// **What it measures:** Sustained `ingest` throughput with `sync=false`,
/// representative of a bulk-load phase.
fn bench_load(c: &mut Criterion) {
    c.bench_function("ycsb_load", |b| {
        b.iter(|| {
            let dir = TempDir::new().unwrap();
            let db = load_database(dir.path());
            black_box(&db);
        });
    });
}

/// Workload A: 50/50 read-update mix.
///
/// **Scenario:** For each of `OPS_PER_RUN` operations, coin-flip between
/// a `select` of the `payload` field and a remove-then-add update of it,
/// against a zipfian-skewed record id.
///
/// **What it measures:** Mixed read/write contention on the shared
/// `RwLock<DatabaseState>` and the primary-partial cache's invalidation
/// churn under frequent updates.
fn bench_workload_a(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let db = load_database(dir.path());
    let mut rng = StdRng::seed_from_u64(42);
    let mut version = RECORD_COUNT as i64 * 2 + 10;

    c.bench_function("ycsb_workload_a", |b| {
        b.iter(|| {
            for _ in 0..OPS_PER_RUN {
                let record = zipfish_record(&mut rng);
                if rng.random_bool(0.5) {
                    let _ = black_box(db.select(&Text::new(FIELD), record, None).unwrap());
                } else {
                    let remove = Write::new(Action::Remove, Text::new(FIELD), Value::String(filler_value(record.0)), record, version);
                    version += 1;
                    db.ingest(&remove, false).unwrap();
                    let add = Write::new(Action::Add, Text::new(FIELD), Value::String(filler_value(record.0 + 1)), record, version);
                    version += 1;
                    db.ingest(&add, false).unwrap();
                }
            }
        });
    });
}

/// Workload B: 95/5 read-heavy mix.
///
/// **Scenario:** Same as workload A but reads occur with 95% probability.
///
/// **What it measures:** Read-dominated throughput, primarily exercising
/// the primary-partial cache's hit rate under a skewed key distribution.
fn bench_workload_b(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let db = load_database(dir.path());
    let mut rng = StdRng::seed_from_u64(43);
    let mut version = RECORD_COUNT as i64 * 2 + 10;

    c.bench_function("ycsb_workload_b", |b| {
        b.iter(|| {
            for _ in 0..OPS_PER_RUN {
                let record = zipfish_record(&mut rng);
                if rng.random_bool(0.95) {
                    let _ = black_box(db.select(&Text::new(FIELD), record, None).unwrap());
                } else {
                    let remove = Write::new(Action::Remove, Text::new(FIELD), Value::String(filler_value(record.0)), record, version);
                    version += 1;
                    db.ingest(&remove, false).unwrap();
                    let add = Write::new(Action::Add, Text::new(FIELD), Value::String(filler_value(record.0 + 1)), record, version);
                    version += 1;
                    db.ingest(&add, false).unwrap();
                }
            }
        });
    });
}

/// Workload C: 100% read.
///
/// **Scenario:** Only `select` calls against a zipfian-skewed record id,
/// no writes at all.
///
/// **What it measures:** Pure read-path latency with caches fully warm
/// after the first pass over the skewed working set.
fn bench_workload_c(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let db = load_database(dir.path());
    let mut rng = StdRng::seed_from_u64(44);

    c.bench_function("ycsb_workload_c", |b| {
        b.iter(|| {
            for _ in 0..OPS_PER_RUN {
                let record = zipfish_record(&mut rng);
                let _ = black_box(db.select(&Text::new(FIELD), record, None).unwrap());
            }
        });
    });
}

/// Workload D: 95/5 read-insert, newest-record bias.
///
/// **Scenario:** 95% of operations `select` a recently-inserted record
/// (biased toward the high end of the id space); 5% `ingest` a brand new
/// record appended past the initial load.
///
/// **What it measures:** Read-mostly latency against freshly-written,
/// still-buffered-or-just-transported data, and insert cost interleaved
/// with reads.
fn bench_workload_d(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let db = load_database(dir.path());
    let mut rng = StdRng::seed_from_u64(45);
    let mut next_id = RECORD_COUNT;
    let mut version = RECORD_COUNT as i64 * 2 + 10;

    c.bench_function("ycsb_workload_d", |b| {
        b.iter(|| {
            for _ in 0..OPS_PER_RUN {
                if rng.random_bool(0.95) {
                    let recent_span = 100.min(next_id);
                    let record = Identifier::new(next_id - 1 - rng.random_range(0..recent_span.max(1)));
                    let _ = black_box(db.select(&Text::new(FIELD), record, None).unwrap());
                } else {
                    let write = Write::new(Action::Add, Text::new(FIELD), Value::String(filler_value(next_id)), Identifier::new(next_id), version);
                    version += 1;
                    db.ingest(&write, false).unwrap();
                    next_id += 1;
                }
            }
        });
    });
}

/// Workload E: 95/5 range-scan-insert mix.
///
/// **Scenario:** 95% of operations `explore` an `age` range of width
/// `EXPLORE_SPAN` starting at a random offset; 5% `ingest` a new record.
///
/// **What it measures:** Secondary-index range scan cost under
/// concurrent insert pressure.
fn bench_workload_e(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let db = load_database(dir.path());
    let mut rng = StdRng::seed_from_u64(46);
    let mut next_id = RECORD_COUNT;
    let mut version = RECORD_COUNT as i64 * 2 + 10;

    c.bench_function("ycsb_workload_e", |b| {
        b.iter(|| {
            for _ in 0..OPS_PER_RUN {
                if rng.random_bool(0.95) {
                    let lo = rng.random_range(0..100 - EXPLORE_SPAN.min(99));
                    let hits = db
                        .explore(&Text::new(AGE_FIELD), Operator::Between, &[Value::Int64(lo), Value::Int64(lo + EXPLORE_SPAN)], None)
                        .unwrap();
                    black_box(&hits);
                } else {
                    let write = Write::new(Action::Add, Text::new(AGE_FIELD), Value::Int64((next_id % 100) as i64), Identifier::new(next_id), version);
                    version += 1;
                    db.ingest(&write, false).unwrap();
                    next_id += 1;
                }
            }
        });
    });
}

/// Workload F: 50/50 read-modify-write.
///
/// **Scenario:** Each operation reads a record's `payload` then
/// immediately updates it (remove-then-add) — simulating a
/// read-modify-write cycle rather than independent read and update ops.
///
/// **What it measures:** Latency of the full read-then-write round trip,
/// including cache invalidation from the write half of every op.
fn bench_workload_f(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let db = load_database(dir.path());
    let mut rng = StdRng::seed_from_u64(47);
    let mut version = RECORD_COUNT as i64 * 2 + 10;

    c.bench_function("ycsb_workload_f", |b| {
        b.iter(|| {
            for _ in 0..OPS_PER_RUN {
                let record = zipfish_record(&mut rng);
                let current = db.select(&Text::new(FIELD), record, None).unwrap();
                if let Some(old_value) = current.iter().next() {
                    let remove = Write::new(Action::Remove, Text::new(FIELD), old_value.clone(), record, version);
                    version += 1;
                    db.ingest(&remove, false).unwrap();
                }
                let add = Write::new(Action::Add, Text::new(FIELD), Value::String(filler_value(record.0 + version as u64)), record, version);
                version += 1;
                db.ingest(&add, false).unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_load,
    bench_workload_a,
    bench_workload_b,
    bench_workload_c,
    bench_workload_d,
    bench_workload_e,
    bench_workload_f,
);

criterion_main!(benches);
