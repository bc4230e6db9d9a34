//! # Bounded Worker Pool
//!
//! Runs a queue of independent async tasks with a fixed concurrency ceiling.
//!
//! `min(max_concurrency, tasks.len())` workers are started; each one claims the
//! next unclaimed task index from a shared atomic counter, awaits it and keeps
//! the outcome under that index. `run` returns only after every worker has
//! drained the queue, so results are released as one snapshot and
//! `results[i]` always belongs to `tasks[i]`, whatever the completion order.
//!
//! A failed task never cancels its siblings. The pool has no timeout and no
//! cancellation of its own: a timeout belongs to the individual task.
//!
//! Workers are polled cooperatively on the caller's task (no `tokio::spawn`),
//! which is what the I/O-bound fetchers need and lets tasks borrow from the
//! caller.

use futures::future::join_all;
use log::debug;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Counters from one `run`, mostly for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolRunStats {
    pub workers: usize,
    pub claimed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct BoundedWorkerPool {
    name: &'static str,
    max_concurrency: usize,
}

impl BoundedWorkerPool {
    /// `max_concurrency` is clamped to at least one worker.
    pub fn new(name: &'static str, max_concurrency: usize) -> Self {
        Self {
            name,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub async fn run<T, E, Fut>(&self, tasks: Vec<Fut>) -> Vec<Result<T, E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_stats(tasks).await.0
    }

    pub async fn run_with_stats<T, E, Fut>(&self, tasks: Vec<Fut>) -> (Vec<Result<T, E>>, PoolRunStats)
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let total = tasks.len();
        if total == 0 {
            return (Vec::new(), PoolRunStats::default());
        }

        let workers = self.max_concurrency.min(total);
        let queue: Vec<Mutex<Option<Fut>>> = tasks.into_iter().map(|t| Mutex::new(Some(t))).collect();
        let next_index = AtomicUsize::new(0);

        let worker_futures = (0..workers).map(|worker_id| {
            let queue = &queue;
            let next_index = &next_index;
            async move {
                let mut finished = Vec::new();
                loop {
                    let index = next_index.fetch_add(1, Ordering::SeqCst);
                    if index >= total {
                        break;
                    }
                    // Each index is handed out once, so the slot is always still full
                    let task = queue[index].lock().ok().and_then(|mut slot| slot.take());
                    if let Some(task) = task {
                        finished.push((index, task.await));
                    }
                }
                debug!(
                    "[{}] worker {} finished {} task(s)",
                    self.name,
                    worker_id,
                    finished.len()
                );
                finished
            }
        });

        // Join barrier: nothing is released until every worker is done
        let per_worker = join_all(worker_futures).await;

        let mut slots: Vec<Option<Result<T, E>>> = (0..total).map(|_| None).collect();
        let mut stats = PoolRunStats {
            workers,
            ..PoolRunStats::default()
        };
        for (index, outcome) in per_worker.into_iter().flatten() {
            stats.claimed += 1;
            if outcome.is_err() {
                stats.failed += 1;
            }
            slots[index] = Some(outcome);
        }
        debug_assert_eq!(stats.claimed, total, "every task must be claimed exactly once");

        (slots.into_iter().flatten().collect(), stats)
    }
}
