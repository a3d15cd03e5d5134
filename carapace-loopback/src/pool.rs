//! Worker threads.
//!
//! Jobs are boxed closures fed through a `flume` channel. A pool with one
//! thread runs its jobs strictly in submission order, which the engine relies
//! on for pipe events.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, trace};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct WorkerPool {
    name: &'static str,
    tx: Mutex<Option<Sender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    thread_ids: Vec<ThreadId>,
}

impl WorkerPool {
    pub(crate) fn new(name: &'static str, threads: usize) -> std::io::Result<Self> {
        let (tx, rx) = flume::unbounded::<Job>();
        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads.max(1) {
            let rx: Receiver<Job> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || run(name, &rx))?;
            handles.push(handle);
        }
        let thread_ids = handles.iter().map(|h| h.thread().id()).collect();
        Ok(Self {
            name,
            tx: Mutex::new(Some(tx)),
            threads: Mutex::new(handles),
            thread_ids,
        })
    }

    /// Queue a job. After shutdown the job is dropped unrun.
    pub(crate) fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(tx) = self.tx.lock().as_ref() {
            // Workers only go away after the sender is dropped.
            let _ = tx.send(Box::new(job));
        }
    }

    /// Whether the calling thread belongs to this pool.
    pub(crate) fn owns_current_thread(&self) -> bool {
        let me = thread::current().id();
        self.thread_ids.contains(&me)
    }

    /// Stop accepting jobs, let the queue drain and join the workers.
    pub(crate) fn shutdown(&self) {
        drop(self.tx.lock().take());
        let me = thread::current().id();
        for handle in self.threads.lock().drain(..) {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                error!(pool = self.name, "worker thread panicked");
            }
        }
    }
}

fn run(name: &'static str, rx: &Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(pool = name, "job panicked");
        }
    }
    trace!(pool = name, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_jobs_run_before_shutdown_returns() {
        let pool = WorkerPool::new("test", 3).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let hits = Arc::clone(&hits);
            pool.execute(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();
        assert_eq!(hits.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_single_thread_preserves_order() {
        let pool = WorkerPool::new("ordered", 1).unwrap();
        let (tx, rx) = flume::unbounded();
        for i in 0..50 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap());
        }
        pool.shutdown();
        let seen: Vec<i32> = rx.try_iter().collect();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new("panicky", 1).unwrap();
        pool.execute(|| panic!("boom"));
        let (tx, rx) = flume::bounded(1);
        pool.execute(move || tx.send(()).unwrap());
        assert!(rx.recv().is_ok());
        pool.shutdown();
    }

    #[test]
    fn test_execute_after_shutdown_is_dropped() {
        let pool = WorkerPool::new("closed", 1).unwrap();
        pool.shutdown();
        pool.execute(|| unreachable!());
        assert!(!pool.owns_current_thread());
    }
}
