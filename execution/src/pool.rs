//! Grow-as-needed worker pool for inbound message dispatch.
//!
//! A job goes to an idle worker when there is one and to a freshly spawned
//! worker otherwise, so a handler that blocks waiting for another message
//! can never starve the handler of that message. Workers that stay idle for
//! the keep-alive period exit.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::ExecutionError;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    name: String,
    jobs_tx: Sender<Job>,
    jobs_rx: Receiver<Job>,
    idle: Arc<AtomicUsize>,
    shut_down: Arc<AtomicBool>,
    spawned: AtomicUsize,
    keep_alive: Duration,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, keep_alive: Duration) -> Self {
        let (jobs_tx, jobs_rx) = unbounded();
        Self {
            name: name.into(),
            jobs_tx,
            jobs_rx,
            idle: Arc::new(AtomicUsize::new(0)),
            shut_down: Arc::new(AtomicBool::new(false)),
            spawned: AtomicUsize::new(0),
            keep_alive,
        }
    }

    pub fn submit<F>(&self, job: F) -> Result<(), ExecutionError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ExecutionError::PoolShutDown);
        }

        let claimed_idle = self
            .idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        self.jobs_tx
            .send(Box::new(job))
            .map_err(|_| ExecutionError::PoolShutDown)?;
        if !claimed_idle {
            self.spawn_worker()?;
        }
        Ok(())
    }

    /// Rejects new jobs; running jobs finish and workers wind down
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    pub fn idle_workers(&self) -> usize {
        self.idle.load(Ordering::Acquire)
    }

    fn spawn_worker(&self) -> Result<(), ExecutionError> {
        let number = self.spawned.fetch_add(1, Ordering::Relaxed);
        let jobs = self.jobs_rx.clone();
        let idle = Arc::clone(&self.idle);
        let shut_down = Arc::clone(&self.shut_down);
        let keep_alive = self.keep_alive;
        thread::Builder::new()
            .name(format!("{}-{number}", self.name))
            .spawn(move || run_worker(jobs, idle, shut_down, keep_alive))
            .map(|_| ())
            .map_err(ExecutionError::WorkerSpawn)
    }
}

fn run_worker(
    jobs: Receiver<Job>,
    idle: Arc<AtomicUsize>,
    shut_down: Arc<AtomicBool>,
    keep_alive: Duration,
) {
    loop {
        match jobs.recv_timeout(keep_alive) {
            Ok(job) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("worker job panicked");
                }
                idle.fetch_add(1, Ordering::AcqRel);
            }
            Err(RecvTimeoutError::Timeout) => {
                // A zero count means a submitter claimed this worker and its job is queued.
                let retired = idle
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                    .is_ok();
                if retired || shut_down.load(Ordering::Acquire) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
