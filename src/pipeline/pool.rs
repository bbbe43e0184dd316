//! Fixed-size worker pool draining a bounded task queue.

use indicatif::ProgressBar;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of one pooled task.
#[derive(Debug)]
pub enum TaskOutcome<R> {
    /// Handler ran to completion and produced a value.
    Completed(R),
    /// Handler panicked; siblings were unaffected.
    Panicked,
}

impl<R> TaskOutcome<R> {
    /// Completed value, if any.
    pub fn completed(self) -> Option<R> {
        match self {
            Self::Completed(r) => Some(r),
            Self::Panicked => None,
        }
    }
}

/// Bounded pool of async workers.
///
/// Items are pushed into a queue whose capacity equals the worker count and
/// pulled by exactly `workers` long-lived tasks. Each item runs in its own
/// spawned task so a panic only affects that item.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Create a pool with `workers` concurrent tasks (at least one).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Number of concurrent workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `handler` over every item and wait until all of them have resolved.
    ///
    /// Results are returned in submission order regardless of completion order.
    pub async fn drain<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        handler: F,
        progress: Option<&ProgressBar>,
    ) -> Vec<TaskOutcome<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let (task_tx, task_rx) = mpsc::channel::<(usize, T)>(self.workers);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, TaskOutcome<R>)>();
        let handler = Arc::new(handler);

        let mut workers = JoinSet::new();
        for worker_idx in 0..self.workers.min(total) {
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            let handler = Arc::clone(&handler);

            workers.spawn(async move {
                loop {
                    // Lock is released before the task runs.
                    let next = task_rx.lock().await.recv().await;
                    let Some((idx, item)) = next else {
                        break;
                    };

                    let outcome = match tokio::spawn(handler(item)).await {
                        Ok(value) => TaskOutcome::Completed(value),
                        Err(e) => {
                            warn!("Worker {worker_idx}: task {idx} aborted: {e}");
                            TaskOutcome::Panicked
                        }
                    };

                    if result_tx.send((idx, outcome)).is_err() {
                        break;
                    }
                }
                debug!("Worker {worker_idx} drained");
            });
        }
        drop(result_tx);

        for entry in items.into_iter().enumerate() {
            if task_tx.send(entry).await.is_err() {
                warn!("Task queue closed before all items were submitted");
                break;
            }
        }
        drop(task_tx);

        let mut results: Vec<Option<TaskOutcome<R>>> = (0..total).map(|_| None).collect();
        while let Some((idx, outcome)) = result_rx.recv().await {
            results[idx] = Some(outcome);
            if let Some(pb) = progress {
                pb.inc(1);
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("Worker task failed: {e}");
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or(TaskOutcome::Panicked))
            .collect()
    }
}
