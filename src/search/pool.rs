//! Shared worker pool servicing the corpus index queue (spec.md §4.6 steps
//! 5-6). Grounded on the teacher's `crossbeam` dependency (declared but, in
//! the sampled source, unused) — this is its first real consumer:
//! `crossbeam::scope` for borrowed-data worker threads, `crossbeam::channel`
//! for the task queue.

use crossbeam::channel::{self, Sender};
use thiserror::Error;

use crate::config::EngineConfig;

use super::task::IndexTask;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("corpus index task failed: {0}")]
    Insert(String),
}

/// Runs `tasks` through `config`'s resolved worker-pool size, calling
/// `insert` for each. The caller awaits every task before considering the
/// write transported; the first task failure aborts the remaining work
/// (spec.md §4.6 step 6).
pub fn dispatch<F>(config: &EngineConfig, tasks: Vec<IndexTask>, insert: F) -> Result<(), SearchError>
where
    F: Fn(&IndexTask) -> Result<(), SearchError> + Sync,
{
    if tasks.is_empty() {
        return Ok(());
    }

    let pool_size = config.resolved_search_pool_size().min(tasks.len());
    let (task_tx, task_rx) = channel::unbounded::<IndexTask>();
    let (err_tx, err_rx): (Sender<SearchError>, _) = channel::unbounded();

    for task in tasks {
        let _ = task_tx.send(task);
    }
    drop(task_tx);

    crossbeam::scope(|scope| {
        for _ in 0..pool_size {
            let task_rx = task_rx.clone();
            let err_tx = err_tx.clone();
            let insert = &insert;
            scope.spawn(move |_| {
                while let Ok(task) = task_rx.recv() {
                    if let Err(e) = insert(&task) {
                        let _ = err_tx.send(e);
                        return;
                    }
                }
            });
        }
    })
    .map_err(|_| SearchError::Insert("worker thread panicked".to_string()))?;

    drop(err_tx);
    match err_rx.try_recv() {
        Ok(first_error) => Err(first_error),
        Err(_) => Ok(()),
    }
}
