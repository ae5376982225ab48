//! Bounded thread pool returning per-task futures.
//!
//! Stages use a pool for intra-rank parallelism: parallel time-axis
//! scans in the reader and map-reduce fan-out in the driver. Tasks are
//! pure functions of their arguments; results come back through
//! [`TaskHandle`]s. A task that fails or panics surfaces as
//! `Error::Resource` on its handle — errors never unwind across the
//! pool boundary.

use crate::error::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Resolve a pool-size property: −1 means hardware concurrency.
pub fn resolve_pool_size(size: i64) -> usize {
    if size < 1 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        size as usize
    }
}

/// A bounded work queue serviced by a fixed set of worker threads.
pub struct ThreadPool {
    sender: Option<kanal::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Create a pool. `size` is the worker count; −1 selects hardware
    /// concurrency. The queue is bounded at twice the worker count, so
    /// producers block rather than buffer unbounded work.
    pub fn new(size: i64) -> Self {
        let n_workers = resolve_pool_size(size);
        let (sender, receiver) = kanal::bounded::<Job>(2 * n_workers);
        let workers = (0..n_workers)
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("stratus-pool-{i}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            // a panicking task must not take the worker down
                            let _ = catch_unwind(AssertUnwindSafe(job));
                        }
                    })
                    .expect("failed to spawn pool worker")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task; blocks when the queue is full.
    pub fn spawn<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = kanal::bounded::<Result<T>>(1);
        let job: Job = Box::new(move || {
            let _ = tx.send(task());
        });
        let sender = self.sender.as_ref().expect("pool is shut down");
        if sender.send(job).is_err() {
            // queue closed; handle will report the missing result
        }
        TaskHandle { rx }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // closing the queue lets workers drain and exit
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Future-like handle to a queued task's result.
pub struct TaskHandle<T> {
    rx: kanal::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task completes.
    ///
    /// A task that panicked (or was dropped unrun) yields
    /// `Error::Resource`.
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| Error::resource("pool task failed to produce a result"))?
    }
}

/// Wait for every handle, preserving submission order.
pub fn wait_all<T>(handles: Vec<TaskHandle<T>>) -> Vec<Result<T>> {
    handles.into_iter().map(TaskHandle::wait).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_preserve_submission_order() {
        let pool = ThreadPool::new(4);
        let handles: Vec<_> = (0..32u64)
            .map(|i| pool.spawn(move || Ok(i * i)))
            .collect();
        let results: Vec<u64> = wait_all(handles)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(results, (0..32u64).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_task_error_propagates() {
        let pool = ThreadPool::new(2);
        let handle = pool.spawn::<u64, _>(|| Err(Error::semantic("bad input")));
        assert!(handle.wait().is_err());
    }

    #[test]
    fn test_panic_becomes_missing_result() {
        let pool = ThreadPool::new(1);
        let boom = pool.spawn::<(), _>(|| panic!("kernel exploded"));
        assert!(matches!(boom.wait(), Err(Error::Resource(_))));

        // the worker survives a panicking task
        let ok = pool.spawn(|| Ok(7));
        assert_eq!(ok.wait().unwrap(), 7);
    }

    #[test]
    fn test_negative_size_uses_hardware_concurrency() {
        let pool = ThreadPool::new(-1);
        assert!(pool.size() >= 1);
    }
}
