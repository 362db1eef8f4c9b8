//! Worker threads
//!
//! Each worker owns one bounded queue and one counting semaphore. The thread
//! sleeps on the semaphore, drains its own queue, then makes a single attempt
//! to steal from a peer before sleeping again.

use super::queue::BoundedQueue;
use super::steal;
use crate::task::{TaskHandle, WorkerIndex};
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerIndex>> = const { Cell::new(None) };
}

/// Index of the worker running on this thread, `None` off the pool
pub fn current_worker() -> Option<WorkerIndex> {
    CURRENT_WORKER.with(Cell::get)
}

/// Statistics for a worker thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Number of tasks executed, stolen ones included
    pub tasks_executed: AtomicUsize,
    /// Number of tasks stolen from other workers
    pub tasks_stolen: AtomicUsize,
    /// Number of steal scans started
    pub steal_attempts: AtomicUsize,
    /// Number of times the worker woke up
    pub wakeups: AtomicUsize,
    /// Number of task bodies that panicked
    pub panics: AtomicUsize,
}

/// Counting semaphore capped at the queue capacity
#[derive(Debug)]
struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
    max: usize,
}

impl Semaphore {
    fn new(max: usize) -> Self {
        Self {
            permits: Mutex::new(0),
            available: Condvar::new(),
            max,
        }
    }

    fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    fn release(&self) {
        let mut permits = self.permits.lock();
        if *permits < self.max {
            *permits += 1;
        }
        drop(permits);
        self.available.notify_one();
    }
}

/// State shared between a worker thread, its peers and the scheduler
#[derive(Debug)]
pub struct Worker {
    index: WorkerIndex,
    steal_start: WorkerIndex,
    queue: BoundedQueue<TaskHandle>,
    signal: Semaphore,
    should_stop: AtomicBool,
    stats: WorkerStats,
}

impl Worker {
    /// Create worker `index` of a pool of `pool_size`
    pub fn new(index: WorkerIndex, pool_size: usize, capacity: usize) -> Self {
        Self {
            index,
            steal_start: (index + 1) % pool_size.max(1),
            queue: BoundedQueue::new(capacity),
            signal: Semaphore::new(capacity),
            should_stop: AtomicBool::new(false),
            stats: WorkerStats::default(),
        }
    }

    /// Position of this worker in the pool
    pub fn index(&self) -> WorkerIndex {
        self.index
    }

    /// Peer at which this worker starts its steal scan
    pub fn steal_start(&self) -> WorkerIndex {
        self.steal_start
    }

    /// The worker's run queue
    pub fn queue(&self) -> &BoundedQueue<TaskHandle> {
        &self.queue
    }

    /// Worker counters
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Enqueue a task, handing it back if the queue is full
    pub(crate) fn push(&self, task: TaskHandle) -> Result<(), TaskHandle> {
        let stealable = task.is_stealable();
        self.queue.push_tagged(task, stealable)?;
        self.signal.release();
        Ok(())
    }

    /// Ask the thread to exit at its next check
    pub(crate) fn stop(&self) {
        self.should_stop.store(true, Ordering::Release);
        self.signal.release();
    }

    fn is_stopping(&self) -> bool {
        self.should_stop.load(Ordering::Acquire)
    }

    /// Run a task on this worker, containing panics from its body
    pub(crate) fn execute(&self, task: TaskHandle) {
        let id = task.id();
        match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
            Ok(true) => {
                self.stats.tasks_executed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                log::trace!("worker {}: task {} already executed, skipping", self.index, id);
            }
            Err(_) => {
                self.stats.panics.fetch_add(1, Ordering::Relaxed);
                log::error!("worker {}: task {} panicked", self.index, id);
            }
        }
    }
}

/// Main worker loop that processes tasks
pub(crate) fn worker_loop(index: WorkerIndex, workers: Arc<[Arc<Worker>]>, cpu_affinity: Option<usize>) {
    #[cfg(target_os = "linux")]
    if let Some(cpu) = cpu_affinity {
        set_cpu_affinity(cpu);
    }
    #[cfg(not(target_os = "linux"))]
    let _ = cpu_affinity;

    CURRENT_WORKER.with(|current| current.set(Some(index)));
    let me = &workers[index];

    loop {
        me.signal.acquire();
        me.stats.wakeups.fetch_add(1, Ordering::Relaxed);
        if me.is_stopping() {
            break;
        }

        while !me.is_stopping() {
            match me.queue.pop() {
                Some(task) => me.execute(task),
                None => break,
            }
        }
        if me.is_stopping() {
            break;
        }

        me.stats.steal_attempts.fetch_add(1, Ordering::Relaxed);
        if let Some((victim, task)) = steal::steal_one(me, &workers) {
            log::trace!("worker {}: stole task {} from worker {}", index, task.id(), victim);
            me.stats.tasks_stolen.fetch_add(1, Ordering::Relaxed);
            me.execute(task);
        }
    }

    CURRENT_WORKER.with(|current| current.set(None));
    log::debug!("worker {} stopped", index);
}

/// Set CPU affinity for the current thread (Linux only)
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn set_cpu_affinity(cpu: usize) {
    use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_ZERO};
    use std::mem;

    // SAFETY: `set` is a plain bitmask owned by this frame.
    let result = unsafe {
        let mut set: cpu_set_t = mem::zeroed();
        CPU_ZERO(&mut set);
        CPU_SET(cpu, &mut set);
        sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &set)
    };
    if result != 0 {
        log::warn!("failed to pin worker thread to cpu {}", cpu);
    }
}
