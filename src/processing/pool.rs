// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-size worker pool
//!
//! Workers are spawned once and pull boxed closures from a shared channel.
//! `submit` never blocks and returns no result; callers observe completion
//! through their own signalling (see [`super::synchronizer::CompletionTracker`]).
//!
//! A panicking task is a programming defect. The worker logs it and aborts
//! the process rather than leave a frame half converted.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error, info};

use crate::constants::pipeline::WORKER_THREAD_PREFIX;
use crate::errors::{PipelineError, PipelineResult};

/// A queued unit of work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool of long-lived worker threads
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers
    pub fn new(size: usize) -> PipelineResult<Self> {
        if size == 0 {
            return Err(PipelineError::Config(
                "worker pool needs at least one thread".to_string(),
            ));
        }

        let (sender, receiver) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);

        for index in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", WORKER_THREAD_PREFIX, index))
                .spawn(move || worker_loop(index, receiver))?;
            workers.push(handle);
        }

        info!(threads = size, "Worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue a job; returns immediately
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            error!("Job submitted to a drained worker pool");
            return;
        };
        // Receivers live as long as the workers, which outlive the sender
        if sender.send(Box::new(job)).is_err() {
            error!("Worker pool channel closed unexpectedly");
        }
    }

    /// Let queued jobs finish, then join every worker
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }

        debug!(threads = self.workers.len(), "Draining worker pool");
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                error!(worker = ?name, "Worker thread panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Log a broken internal invariant and abort
pub fn contract_violation(message: &str) -> ! {
    error!(violation = message, "Pipeline contract violated, aborting");
    std::process::abort()
}

fn worker_loop(index: usize, receiver: Receiver<Job>) {
    debug!(worker = index, "Worker thread started");

    // recv fails once the sender is dropped and the queue is empty
    while let Ok(job) = receiver.recv() {
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(worker = index, panic = %message, "Conversion task panicked, aborting");
            std::process::abort();
        }
    }

    debug!(worker = index, "Worker thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_jobs_run_on_pool_threads() {
        let pool = WorkerPool::new(3).unwrap();
        let (tx, rx) = channel::unbounded();

        for _ in 0..12 {
            let tx = tx.clone();
            pool.submit(move || {
                let name = thread::current().name().unwrap_or_default().to_string();
                tx.send(name).unwrap();
            });
        }

        for _ in 0..12 {
            let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(name.starts_with(WORKER_THREAD_PREFIX));
        }
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let mut pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert_eq!(pool.size(), 0);

        // Idempotent
        pool.shutdown();
    }
}
