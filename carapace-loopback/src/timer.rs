//! Timer thread for AIO timeouts, sleeps and reconnect delays.
//!
//! Jobs run on the timer thread itself and must be short; anything that calls
//! user code hands off to a worker pool.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::pool::Job;

/// Handle for cancelling a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    jobs: HashMap<u64, Job>,
    next: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

pub(crate) struct Timers {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Timers {
    pub(crate) fn new() -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::default()),
            wake: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("carapace-timer".to_string())
            .spawn(move || run(&worker))?;
        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Run `job` at `deadline`.
    pub(crate) fn schedule(&self, deadline: Instant, job: impl FnOnce() + Send + 'static) -> TimerId {
        let mut state = self.shared.state.lock();
        let id = state.next;
        state.next += 1;
        state.heap.push(Reverse((deadline, id)));
        state.jobs.insert(id, Box::new(job));
        drop(state);
        self.shared.wake.notify_one();
        TimerId(id)
    }

    /// Drop a pending job. Returns false if it already ran or was cancelled.
    pub(crate) fn cancel(&self, id: TimerId) -> bool {
        self.shared.state.lock().jobs.remove(&id.0).is_some()
    }

    /// Drop every pending job and stop the thread.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.jobs.clear();
            state.heap.clear();
        }
        self.shared.wake.notify_one();
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let now = Instant::now();
        match state.heap.peek().copied() {
            Some(Reverse((deadline, id))) if deadline <= now => {
                state.heap.pop();
                if let Some(job) = state.jobs.remove(&id) {
                    drop(state);
                    trace!(timer = id, "timer fired");
                    job();
                    state = shared.state.lock();
                }
            }
            Some(Reverse((deadline, _))) => {
                shared.wake.wait_until(&mut state, deadline);
            }
            None => shared.wake.wait(&mut state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fires_in_deadline_order() {
        let timers = Timers::new().unwrap();
        let (tx, rx) = flume::unbounded();
        let now = Instant::now();
        for (label, ms) in [("c", 30), ("a", 5), ("b", 15)] {
            let tx = tx.clone();
            timers.schedule(now + Duration::from_millis(ms), move || {
                tx.send(label).unwrap();
            });
        }
        let order: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(order, ["a", "b", "c"]);
        timers.shutdown();
    }

    #[test]
    fn test_cancelled_job_never_runs() {
        let timers = Timers::new().unwrap();
        let (tx, rx) = flume::unbounded::<()>();
        let id = timers.schedule(Instant::now() + Duration::from_millis(20), move || {
            tx.send(()).unwrap();
        });
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        timers.shutdown();
    }
}
