//! Common test harness for rust-taskflow integration tests
//!
//! Builds schedulers, the arithmetic activities the pipeline tests share, and
//! a gate task that holds a worker until the test releases it.

#![allow(dead_code)]

use crossbeam::channel::{bounded, Receiver, Sender};
use rust_taskflow::prelude::*;
use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

/// Upper bound for any single wait in a test
pub const WAIT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Initialize the test environment once
pub fn init_test_env() {
    INIT.call_once(|| {
        // Logging stays silent unless a test binary installs a logger.
        log::debug!("rust-taskflow integration tests starting");
    });
}

/// Scheduler with `workers` threads and the default queue capacity
pub fn scheduler(workers: usize) -> Arc<Scheduler> {
    init_test_env();
    Scheduler::new(SchedulerConfig::with_workers(workers)).expect("scheduler")
}

/// Scheduler with `workers` threads and `capacity` slots per queue
pub fn scheduler_with_capacity(workers: usize, capacity: usize) -> Arc<Scheduler> {
    init_test_env();
    let config = SchedulerConfig {
        queue_capacity: capacity,
        ..SchedulerConfig::with_workers(workers)
    };
    Scheduler::new(config).expect("scheduler")
}

pub fn sub(a: i32, b: i32) -> i32 {
    a - b
}

/// `[sub(1,2), sub(2,2), sub(10,1)]`, expected results `[-1, 0, 9]`
pub fn three_subtractions() -> Vec<Activity> {
    vec![
        Activity::new(|| sub(1, 2)),
        Activity::new(|| sub(2, 2)),
        Activity::new(|| sub(10, 1)),
    ]
}

/// Which result slots of `pipeline` are populated
pub fn filled<P: ExecutionPolicy>(pipeline: &Pipeline<P>) -> Vec<bool> {
    (0..pipeline.len()).map(|i| pipeline.value(i).is_some()).collect()
}

/// Holds a worker busy until released
pub struct Gate {
    started: Receiver<()>,
    release: Sender<()>,
}

impl Gate {
    /// Post a pinned task to `worker` that blocks until [`Gate::open`].
    /// Returns once the task is running.
    pub fn block(scheduler: &Scheduler, worker: WorkerIndex) -> (Gate, ResultChannel<()>) {
        let (started_tx, started) = bounded(1);
        let (release, release_rx) = bounded::<()>(1);
        let task = Task::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv_timeout(WAIT);
        })
        .with_affinity(worker)
        .pinned();

        let done = scheduler.post(task).expect("post gate");
        let gate = Gate { started, release };
        gate.started.recv_timeout(WAIT).expect("gate task never started");
        (gate, done)
    }

    /// Let the blocked task finish
    pub fn open(self) {
        let _ = self.release.send(());
    }
}

/// Drive a future on the current thread
pub fn block_on<F: Future>(future: F) -> F::Output {
    init_test_env();
    futures::executor::block_on(future)
}
