// src/concurrency.rs

//! Bounded fan-out/fan-in
//!
//! [`BoundedPool`] runs work on a dedicated rayon pool whose size is the
//! configured concurrency, so at most that many tasks run at once. Results
//! come back through a bounded channel sized to the same limit and are drained
//! by the calling thread.
//!
//! Every launched task owns a [`Completion`] handle. The handle sends exactly
//! one message: the task's result, or an error when the task panics or drops
//! the handle without reporting. The collector therefore receives exactly as
//! many messages as tasks were launched and can never wait on a task that
//! already exited.

use crate::error::{Error, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, SyncSender};
use tracing::debug;

/// Worker pool bounded by a concurrency limit
pub struct BoundedPool {
    pool: rayon::ThreadPool,
    limit: usize,
}

impl BoundedPool {
    /// Create a pool running at most `limit` tasks concurrently
    pub fn new(limit: usize) -> Result<Self> {
        let limit = limit.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(limit)
            .thread_name(|i| format!("quarry-worker-{}", i))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to build worker pool: {}", e)))?;
        Ok(Self { pool, limit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `task` once per item and collect every result
    ///
    /// Results arrive in completion order; a task that needs to be matched
    /// back to its input should return the key along with its value.
    pub fn map<I, T, F>(&self, items: Vec<I>, task: F) -> Vec<Result<T>>
    where
        I: Send,
        T: Send,
        F: Fn(I) -> Result<T> + Sync,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let task = &task;
        self.pool.in_place_scope(|scope| {
            let mut collector = ResultCollector::new(self.limit);
            for item in items {
                let completion = collector.launch();
                scope.spawn(move |_| completion.finish(guarded(|| task(item))));
            }
            collector.collect()
        })
    }

    /// Drain a job queue with a fixed set of `limit` workers
    ///
    /// Each worker pulls jobs until the queue is empty and reports once. The
    /// first error stops the worker that hit it; other workers keep going.
    /// All worker errors are combined.
    pub fn drain<J, F>(&self, jobs: Vec<J>, worker: F) -> Result<usize>
    where
        J: Send,
        F: Fn(J) -> Result<()> + Sync,
    {
        let total = jobs.len();
        if total == 0 {
            return Ok(0);
        }

        let (job_tx, job_rx) = mpsc::channel();
        for job in jobs {
            // The receiver is alive until the end of this function
            let _ = job_tx.send(job);
        }
        drop(job_tx);
        let queue = Mutex::new(job_rx);

        let workers = self.limit.min(total);
        debug!("Draining {} jobs with {} workers", total, workers);

        let queue = &queue;
        let worker = &worker;
        let results = self.pool.in_place_scope(|scope| {
            let mut collector = ResultCollector::new(workers);
            for _ in 0..workers {
                let completion = collector.launch();
                scope.spawn(move |_| {
                    completion.finish(guarded(|| {
                        let mut done = 0usize;
                        loop {
                            let next = match queue.lock() {
                                Ok(rx) => rx.recv().ok(),
                                Err(_) => {
                                    return Err(Error::TransactionError(
                                        "job queue lock poisoned".into(),
                                    ));
                                }
                            };
                            let Some(job) = next else {
                                return Ok(done);
                            };
                            worker(job)?;
                            done += 1;
                        }
                    }))
                });
            }
            collector.collect()
        });

        Ok(aggregate(results)?.into_iter().sum())
    }
}

/// Run a closure, turning a panic into an error
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::TransactionError(format!("task panicked: {}", msg)))
        }
    }
}

/// Counts launched tasks and receives exactly one result from each
pub struct ResultCollector<T> {
    tx: SyncSender<Result<T>>,
    rx: Receiver<Result<T>>,
    launched: usize,
}

impl<T> ResultCollector<T> {
    /// Collector with a result buffer of `capacity`
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        Self {
            tx,
            rx,
            launched: 0,
        }
    }

    /// Register one more task and hand out its completion handle
    pub fn launch(&mut self) -> Completion<T> {
        self.launched += 1;
        Completion {
            tx: Some(self.tx.clone()),
        }
    }

    pub fn launched(&self) -> usize {
        self.launched
    }

    /// Block until every launched task has reported
    pub fn collect(self) -> Vec<Result<T>> {
        let Self { tx, rx, launched } = self;
        drop(tx);
        let mut results = Vec::with_capacity(launched);
        for _ in 0..launched {
            match rx.recv() {
                Ok(result) => results.push(result),
                // Only reachable if a handle was leaked with mem::forget
                Err(_) => break,
            }
        }
        results
    }
}

/// One-shot result handle owned by a task
pub struct Completion<T> {
    tx: Option<SyncSender<Result<T>>>,
}

impl<T> Completion<T> {
    /// Report the task's result
    pub fn finish(mut self, result: Result<T>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(Error::TransactionError(
                "task exited without reporting a result".into(),
            )));
        }
    }
}

/// Fail closed: all values, or one error naming every failure
pub fn aggregate<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(v) => values.push(v),
            Err(e) => errors.push(e.to_string()),
        }
    }

    if errors.is_empty() {
        Ok(values)
    } else {
        Err(Error::Aggregate(errors))
    }
}
