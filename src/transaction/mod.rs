//! Transaction / atomic operation (spec.md §4.9).
//!
//! A transaction stages writes in a private [`ToggleQueue`], tracks the
//! set of composites it touches as a `lockSet`, and commits by writing a
//! backup file to the transaction directory before applying to the
//! destination — mirroring the teacher's manifest WAL-then-apply
//! discipline (`manifest::Manifest::checkpoint`'s
//! serialize-fsync-rename-then-mutate ordering), transplanted from a
//! whole-database manifest to a single transaction's backup file.

mod toggle_queue;

pub use toggle_queue::ToggleQueue;

use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::value::Composite;
use crate::write::Write;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("transaction backup at {0:?} is corrupt and was discarded")]
    CorruptBackup(PathBuf),

    #[error("atomic operation attempted on a transaction that already {0}")]
    StateViolation(&'static str),

    /// Bridges a [`TransactionTarget`] failure that originates outside this
    /// module (e.g. `crate::database::Database`) without introducing an
    /// upward dependency here.
    #[error("downstream target error: {0}")]
    Downstream(String),
}

/// Implemented by whatever a transaction ultimately mutates. `apply` with
/// `sync_and_verify = true` must manually check whether `write` is already
/// durable before reapplying it, so that recovery replay is idempotent
/// (spec.md §4.9, §8.1 "idempotence of double-transport recovery").
pub trait TransactionTarget {
    fn apply(&self, write: &Write, sync_and_verify: bool) -> Result<(), TransactionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// A single atomic operation against a [`TransactionTarget`].
pub struct Transaction<'a, T: TransactionTarget> {
    target: &'a T,
    dir: PathBuf,
    id: u64,
    queue: ToggleQueue,
    lock_set: Vec<Composite>,
    state: TransactionState,
}

impl<'a, T: TransactionTarget> Transaction<'a, T> {
    pub fn new(target: &'a T, dir: impl Into<PathBuf>, id: u64) -> Self {
        Self {
            target,
            dir: dir.into(),
            id,
            queue: ToggleQueue::new(),
            lock_set: Vec::new(),
            state: TransactionState::Active,
        }
    }

    /// Stage `write`, locking `composite` against concurrent transactions
    /// touching the same key. Caller is responsible for acquiring the
    /// actual lock; this only records it for the backup record.
    pub fn stage(&mut self, composite: Composite, write: Write) -> Result<(), TransactionError> {
        self.require_active()?;
        if !self.lock_set.contains(&composite) {
            self.lock_set.push(composite);
        }
        self.queue.push(write);
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.queue.is_empty()
    }

    fn require_active(&self) -> Result<(), TransactionError> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(TransactionError::StateViolation("committed")),
            TransactionState::Aborted => Err(TransactionError::StateViolation("aborted")),
        }
    }

    /// Commit protocol (spec.md §4.9):
    /// 1. read-only transactions apply directly, no backup needed.
    /// 2. otherwise, serialize + fsync a backup file, apply with
    ///    `sync_and_verify=false`, then delete the backup.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        self.require_active()?;

        if self.is_read_only() {
            self.state = TransactionState::Committed;
            return Ok(());
        }

        let backup_path = backup_path(&self.dir, self.id);
        write_backup(&backup_path, &self.lock_set, self.queue.iter())?;

        for write in self.queue.iter() {
            self.target.apply(write, false)?;
        }

        fs::remove_file(&backup_path)?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    pub fn abort(mut self) -> Result<(), TransactionError> {
        self.require_active()?;
        self.state = TransactionState::Aborted;
        Ok(())
    }
}

fn backup_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.txn"))
}

/// `[lockSetSize:i32][lockSet:bytes][writes:bytes]` (spec.md §6.2).
fn write_backup<'w>(
    path: &Path,
    lock_set: &[Composite],
    writes: impl Iterator<Item = &'w Write>,
) -> Result<(), TransactionError> {
    let mut lock_bytes = Vec::new();
    encoding::encode_vec(lock_set, &mut lock_bytes)?;

    let mut body = Vec::new();
    i32::try_from(lock_bytes.len())
        .map_err(|_| TransactionError::Encoding(EncodingError::LengthOverflow(format!("lock set of {} bytes", lock_bytes.len()))))?
        .encode_to(&mut body)?;
    body.extend_from_slice(&lock_bytes);

    let writes: Vec<Write> = writes.cloned().collect();
    encoding::encode_vec(&writes, &mut body)?;

    let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    file.write_all(&body)?;
    file.sync_all()?;
    Ok(())
}

struct Backup {
    #[allow(dead_code)]
    lock_set: Vec<Composite>,
    writes: Vec<Write>,
}

fn read_backup(bytes: &[u8]) -> Result<Backup, EncodingError> {
    let (lock_set_size, mut offset) = i32::decode_from(bytes)?;
    let lock_set_size = usize::try_from(lock_set_size)
        .map_err(|_| EncodingError::LengthOverflow(format!("negative lock set size {lock_set_size}")))?;

    if bytes.len() < offset + lock_set_size {
        return Err(EncodingError::UnexpectedEof { needed: offset + lock_set_size, available: bytes.len() });
    }
    let (lock_set, _) = encoding::decode_vec::<Composite>(&bytes[offset..offset + lock_set_size])?;
    offset += lock_set_size;

    let (writes, _) = encoding::decode_vec::<Write>(&bytes[offset..])?;
    Ok(Backup { lock_set, writes })
}

/// Recovery (spec.md §4.9): scan `dir/*.txn`, resume each as `COMMITTED`,
/// apply with `sync_and_verify=true`, then delete. Corrupt backups are
/// logged and discarded — the commit they describe is treated as having
/// never happened.
pub fn recover<T: TransactionTarget>(dir: &Path, target: &T) -> Result<usize, TransactionError> {
    fs::create_dir_all(dir)?;

    let mut recovered = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txn") {
            continue;
        }

        let bytes = fs::read(&path)?;
        match read_backup(&bytes) {
            Ok(backup) => {
                for write in &backup.writes {
                    target.apply(write, true)?;
                }
                fs::remove_file(&path)?;
                recovered += 1;
            }
            Err(e) => {
                warn!("discarding corrupt transaction backup {:?}: {}", path, e);
                let _ = fs::remove_file(&path);
            }
        }
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Action, Identifier, Text, Value};
    use std::cell::RefCell;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingTarget {
        applied: RefCell<Vec<(Write, bool)>>,
    }

    impl TransactionTarget for RecordingTarget {
        fn apply(&self, write: &Write, sync_and_verify: bool) -> Result<(), TransactionError> {
            self.applied.borrow_mut().push((write.clone(), sync_and_verify));
            Ok(())
        }
    }

    fn sample_write() -> Write {
        Write::new(Action::Add, Text::new("name"), Value::String("alice".into()), Identifier::new(1), 1)
    }

    #[test]
    fn commit_writes_backup_then_applies_then_deletes_it() {
        let dir = tempdir().unwrap();
        let target = RecordingTarget::default();
        let mut txn = Transaction::new(&target, dir.path(), 1);
        let composite = Composite::builder().add(&Identifier::new(1)).unwrap().build();
        txn.stage(composite, sample_write()).unwrap();
        txn.commit().unwrap();

        assert_eq!(target.applied.borrow().len(), 1);
        assert!(!target.applied.borrow()[0].1);
        assert!(!backup_path(dir.path(), 1).exists());
    }

    #[test]
    fn read_only_commit_applies_nothing() {
        let dir = tempdir().unwrap();
        let target = RecordingTarget::default();
        let txn = Transaction::new(&target, dir.path(), 2);
        txn.commit().unwrap();
        assert!(target.applied.borrow().is_empty());
    }

    #[test]
    fn committing_twice_is_a_state_violation() {
        let dir = tempdir().unwrap();
        let target = RecordingTarget::default();
        let txn = Transaction::new(&target, dir.path(), 3);
        // Can't literally call commit twice (it consumes self); verify the
        // state check directly via abort-then-stage instead.
        txn.abort().unwrap();

        let mut txn2 = Transaction::new(&target, dir.path(), 4);
        txn2.abort().unwrap();
        let composite = Composite::builder().add(&Identifier::new(1)).unwrap().build();
        assert!(matches!(
            txn2.stage(composite, sample_write()),
            Err(TransactionError::StateViolation("aborted"))
        ));
    }

    #[test]
    fn recover_applies_backup_with_verify_and_deletes_it() {
        let dir = tempdir().unwrap();
        let target = RecordingTarget::default();

        let lock_set = vec![Composite::builder().add(&Identifier::new(1)).unwrap().build()];
        write_backup(&backup_path(dir.path(), 9), &lock_set, [sample_write()].iter()).unwrap();

        let recovered = recover(dir.path(), &target).unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(target.applied.borrow().len(), 1);
        assert!(target.applied.borrow()[0].1);
        assert!(!backup_path(dir.path(), 9).exists());
    }

    #[test]
    fn recover_discards_corrupt_backup() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        let path = backup_path(dir.path(), 7);
        fs::write(&path, b"not a valid transaction backup").unwrap();

        let target = RecordingTarget::default();
        let recovered = recover(dir.path(), &target).unwrap();
        assert_eq!(recovered, 0);
        assert!(target.applied.borrow().is_empty());
        assert!(!path.exists());
    }
}
