//! Bounded decode offload.
//!
//! Submitted jobs wait in a pool-owned FIFO queue. At most `capacity` worker
//! loops drain it, each on tokio's blocking thread pool, so jobs start in
//! submission order; completions are delivered in the order they finish.

use crate::codec;
use crate::error::{ProtocolError, WorkerFailure};
use crate::protocol::Message;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{error, trace};

/// Result of a decode job.
pub type DecodeOutcome = Result<Result<Message, ProtocolError>, WorkerFailure>;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    workers: usize,
}

struct PoolState {
    capacity: usize,
    queue: Mutex<Queue>,
    busy: AtomicUsize,
    queued: AtomicUsize,
}

impl PoolState {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-capacity pool of blocking workers.
///
/// Cloning is cheap; clones share the same queue and counters. Submission
/// must happen from inside a tokio runtime.
#[derive(Clone)]
pub struct WorkerPool {
    state: Arc<PoolState>,
}

impl WorkerPool {
    /// Pool with an explicit capacity (clamped to at least one worker).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(PoolState {
                capacity: capacity.max(1),
                queue: Mutex::new(Queue::default()),
                busy: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
            }),
        }
    }

    /// Pool sized to `multiplier` times the detected hardware concurrency.
    pub fn with_multiplier(multiplier: usize) -> Self {
        Self::new(num_cpus::get().saturating_mul(multiplier))
    }

    /// Maximum number of concurrently executing jobs.
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Jobs currently executing.
    pub fn busy(&self) -> usize {
        self.state.busy.load(Ordering::Acquire)
    }

    /// Jobs waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.state.queued.load(Ordering::Acquire)
    }

    /// Run `job` on a worker and hand its result to `on_complete` exactly once.
    ///
    /// The job's queue position is fixed before this returns. A panicking job
    /// is reported as [`WorkerFailure::Panicked`]; the worker carries on with
    /// the next job either way.
    pub fn submit_with<T, F, C>(&self, job: F, on_complete: C)
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        C: FnOnce(Result<T, WorkerFailure>) + Send + 'static,
    {
        let task: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
                let reason = panic_message(payload);
                error!(%reason, "Worker job panicked");
                WorkerFailure::Panicked(reason)
            });
            on_complete(outcome);
        });

        let spawn_worker = {
            let mut queue = self.state.lock();
            queue.jobs.push_back(task);
            self.state.queued.fetch_add(1, Ordering::AcqRel);
            if queue.workers < self.state.capacity {
                queue.workers += 1;
                true
            } else {
                false
            }
        };

        if spawn_worker {
            let state = Arc::clone(&self.state);
            tokio::task::spawn_blocking(move || run_worker(&state));
        }
    }

    /// Run `job` on a worker and await its result through the returned handle.
    pub fn submit<T, F>(&self, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit_with(job, move |outcome| {
            let _ = tx.send(outcome);
        });
        JobHandle { rx }
    }

    /// Decode a frame on a worker. The buffer moves into the job.
    pub fn submit_decode<C>(&self, frame: Vec<u8>, on_complete: C)
    where
        C: FnOnce(DecodeOutcome) + Send + 'static,
    {
        trace!(bytes = frame.len(), "Submitting decode job");
        self.submit_with(move || codec::decode(&frame), on_complete);
    }
}

/// Drain the queue until it is empty, then give the worker slot back.
fn run_worker(state: &PoolState) {
    loop {
        let job = {
            let mut queue = state.lock();
            match queue.jobs.pop_front() {
                Some(job) => {
                    state.queued.fetch_sub(1, Ordering::AcqRel);
                    state.busy.fetch_add(1, Ordering::AcqRel);
                    job
                }
                None => {
                    queue.workers -= 1;
                    return;
                }
            }
        };
        job();
        state.busy.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity())
            .field("busy", &self.busy())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Completion handle for a job submitted with [`WorkerPool::submit`].
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T, WorkerFailure>>,
}

impl<T> JobHandle<T> {
    /// Wait for the job to finish.
    pub async fn join(self) -> Result<T, WorkerFailure> {
        self.rx.await.unwrap_or(Err(WorkerFailure::Cancelled))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use std::time::Duration;

    #[test]
    fn capacity_is_at_least_one() {
        assert_eq!(WorkerPool::new(0).capacity(), 1);
        assert!(WorkerPool::with_multiplier(0).capacity() >= 1);
        assert!(WorkerPool::with_multiplier(2).capacity() >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_jobs_never_exceed_capacity() {
        let pool = WorkerPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.join().await.expect("job completes"));
        }

        results.sort_unstable();
        assert_eq!(results, (0..12).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(pool.busy(), 0);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn panic_is_reported_and_slot_returned() {
        let pool = WorkerPool::new(1);

        let failed = pool.submit(|| -> u32 { panic!("boom") }).join().await;
        match failed {
            Err(WorkerFailure::Panicked(reason)) => assert!(reason.contains("boom")),
            other => panic!("expected panic failure, got {other:?}"),
        }

        let ok = pool.submit(|| 7u32).join().await;
        assert_eq!(ok.expect("pool still usable"), 7);
    }

    #[tokio::test]
    async fn decode_jobs_report_through_callback() {
        let pool = WorkerPool::new(2);
        let frame = codec::encode(&Message::chat("chat", "a", "hi")).expect("encode");

        let (tx, rx) = oneshot::channel();
        pool.submit_decode(frame, move |outcome| {
            let _ = tx.send(outcome);
        });

        let message = rx.await.expect("callback fired").expect("no worker failure");
        assert_eq!(message.expect("valid frame").kind, MessageType::Chat);

        let (tx, rx) = oneshot::channel();
        pool.submit_decode(vec![0x78, 0x9C, 0x00], move |outcome| {
            let _ = tx.send(outcome);
        });
        let outcome = rx.await.expect("callback fired").expect("no worker failure");
        assert!(outcome.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_jobs_start_in_submission_order() {
        let pool = WorkerPool::new(1);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let blocker = pool.submit(move || {
            let _ = release_rx.recv();
        });

        let submitter = {
            let pool = pool.clone();
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                (0..6)
                    .map(|i| {
                        let order = Arc::clone(&order);
                        pool.submit(move || order.lock().unwrap().push(i))
                    })
                    .collect::<Vec<_>>()
            })
        };
        let handles = submitter.await.expect("submitter task");
        assert!(pool.queued() >= 6, "jobs wait behind the blocker");

        release_tx.send(()).expect("blocker waiting");
        blocker.join().await.expect("blocker completes");
        for handle in handles {
            handle.join().await.expect("job completes");
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(pool.busy(), 0);
        assert_eq!(pool.queued(), 0);
    }
}
