//! Background pool for frame decode and upload tasks
//!
//! Work-stealing deques keep newly issued requests hot:
//! - tasks land in a global injector, workers drain it before stealing
//! - each worker owns a FIFO deque and steals from peers when idle
//!
//! The shared epoch counter implements cooperative cancellation: every
//! navigation request bumps the epoch, and superseded tasks notice at their
//! next checkpoint instead of being killed mid-write.

use crossbeam::deque::{Injector, Worker};
use log::trace;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Decode worker pool with epoch-based cancellation.
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Reasonable default thread count: most cores, minus headroom for the
    /// render/session thread.
    pub fn default_threads() -> usize {
        (num_cpus::get() * 3 / 4).max(1)
    }

    /// Create the pool. `epoch` is shared with the presenter so upload
    /// checkpoints and task-entry checks observe the same counter.
    pub fn new(num_threads: usize, epoch: Arc<AtomicU64>) -> Self {
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut locals: Vec<Worker<Job>> = Vec::new();
        let mut stealers = Vec::new();
        let mut handles = Vec::new();

        for _ in 0..num_threads {
            let local: Worker<Job> = Worker::new_fifo();
            stealers.push(local.stealer());
            locals.push(local);
        }

        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let handle = thread::Builder::new()
                .name(format!("splaya-decode-{worker_id}"))
                .spawn(move || {
                    trace!("Decode worker {worker_id} started");
                    loop {
                        if let Some(job) = local.pop() {
                            job();
                            continue;
                        }
                        if let Some(job) = injector.steal().success() {
                            job();
                            continue;
                        }

                        let mut stole = false;
                        for stealer in &stealers {
                            if let Some(job) = stealer.steal().success() {
                                job();
                                stole = true;
                                break;
                            }
                        }
                        if stole {
                            continue;
                        }

                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        // Idle: short sleep instead of spinning.
                        thread::sleep(std::time::Duration::from_millis(1));
                    }
                    trace!("Decode worker {worker_id} stopped");
                })
                .expect("failed to spawn decode worker");

            handles.push(handle);
        }

        trace!("Workers initialized: {num_threads} threads");

        Self {
            injector,
            handles,
            current_epoch: epoch,
            shutdown,
        }
    }

    /// Enqueue a task unconditionally. The task itself is responsible for
    /// any cancellation checks (decode tasks deliver their result even when
    /// superseded, so a newer request for the same frame can reuse it).
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.injector.push(Box::new(f));
    }

    /// Enqueue a task that only runs if the epoch still matches when a
    /// worker picks it up. Used for upload-only tasks, which have nothing
    /// to salvage once superseded.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current = Arc::clone(&self.current_epoch);
        self.injector.push(Box::new(move || {
            if current.load(Ordering::Relaxed) == epoch {
                f();
            }
        }));
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Bump the epoch, superseding every in-flight request. Returns the new
    /// value for tagging the replacement request.
    pub fn advance_epoch(&self) -> u64 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("Epoch advanced to {new_epoch}");
        new_epoch
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        use std::time::{Duration, Instant};

        self.shutdown.store(true, Ordering::SeqCst);

        // Bounded wait; leaked threads die with the process if a decode is
        // wedged on I/O.
        let deadline = Instant::now() + Duration::from_millis(500);
        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Worker shutdown timeout, detaching");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("All decode workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(threads: usize) -> Workers {
        Workers::new(threads, Arc::new(AtomicU64::new(0)))
    }

    #[test]
    fn executes_jobs() {
        let workers = pool(2);
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..8 {
            let tx = tx.clone();
            workers.execute(move || {
                let _ = tx.send(i);
            });
        }
        let mut got: Vec<i32> = (0..8).map(|_| rx.recv().unwrap()).collect();
        got.sort_unstable();
        assert_eq!(got, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn stale_epoch_jobs_are_skipped() {
        let workers = pool(1);
        let (tx, rx) = crossbeam_channel::unbounded();

        let stale = workers.current_epoch();
        workers.advance_epoch();

        let tx_stale = tx.clone();
        workers.execute_with_epoch(stale, move || {
            let _ = tx_stale.send("stale");
        });
        let current = workers.current_epoch();
        workers.execute_with_epoch(current, move || {
            let _ = tx.send("current");
        });

        assert_eq!(rx.recv().unwrap(), "current");
        assert!(rx
            .recv_timeout(std::time::Duration::from_millis(100))
            .is_err());
    }
}
