//! Scheduler coordination
//!
//! Owns the worker threads, routes tasks to queues, and tears the pool down.
//! Each scheduler is an explicit instance; components that need one receive an
//! `Arc<Scheduler>`.

use super::queue::DEFAULT_CAPACITY;
use super::worker::{worker_loop, Worker};
use crate::channel::ResultChannel;
use crate::error::{Error, Result};
use crate::task::{Runnable, Task, TaskHandle, WorkerIndex};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub num_workers: usize,
    /// Entries per worker queue
    pub queue_capacity: usize,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Pin worker `i` to CPU `i % cpus` (Linux only)
    pub enable_cpu_affinity: bool,
    /// Stack size for worker threads, platform default when `None`
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            queue_capacity: DEFAULT_CAPACITY,
            thread_name_prefix: "taskflow-worker".to_string(),
            enable_cpu_affinity: false,
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration with `num_workers` threads
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }
}

/// Scheduler statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks accepted by `post`
    pub tasks_posted: usize,
    /// Tasks refused by `post`
    pub tasks_rejected: usize,
    /// Tasks run to completion by workers
    pub tasks_executed: usize,
    /// Tasks run by a worker other than the one they were queued on
    pub tasks_stolen: usize,
    /// Tasks currently waiting in queues
    pub tasks_queued: usize,
}

/// Work-stealing thread pool
pub struct Scheduler {
    workers: Arc<[Arc<Worker>]>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    /// Posts hold the read side from the flag check through the push.
    shutdown: RwLock<bool>,
    tasks_posted: AtomicUsize,
    tasks_rejected: AtomicUsize,
}

impl Scheduler {
    /// Create a scheduler and start its workers
    pub fn new(config: SchedulerConfig) -> Result<Arc<Self>> {
        let num_workers = if config.num_workers == 0 {
            num_cpus::get()
        } else {
            config.num_workers
        };
        if config.queue_capacity == 0 {
            return Err(Error::InvalidArgument {
                reason: "queue capacity must be non-zero".to_string(),
            });
        }

        let workers: Arc<[Arc<Worker>]> = (0..num_workers)
            .map(|i| Arc::new(Worker::new(i, num_workers, config.queue_capacity)))
            .collect();

        let scheduler = Arc::new(Scheduler {
            workers: Arc::clone(&workers),
            handles: Mutex::new(Vec::with_capacity(num_workers)),
            shutdown: RwLock::new(false),
            tasks_posted: AtomicUsize::new(0),
            tasks_rejected: AtomicUsize::new(0),
        });

        let cpus = num_cpus::get();
        for i in 0..num_workers {
            let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, i));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let workers = Arc::clone(&workers);
            let cpu = config.enable_cpu_affinity.then_some(i % cpus);
            let spawned = builder.spawn(move || worker_loop(i, workers, cpu));

            match spawned {
                Ok(handle) => scheduler.handles.lock().push(handle),
                Err(e) => {
                    // Dropping `scheduler` stops the workers already started.
                    return Err(Error::RuntimeError {
                        reason: format!("Failed to spawn worker thread: {}", e),
                    });
                }
            }
        }

        log::info!(
            "Scheduler created with {} workers, queue capacity {}",
            num_workers,
            config.queue_capacity
        );

        Ok(scheduler)
    }

    /// Hand a task to the scheduler, which drops it after it runs
    pub fn post<T: Send + 'static>(&self, task: Task<T>) -> Result<ResultChannel<T>> {
        let channel = task.result_channel();
        self.post_handle(TaskHandle::Owned(Box::new(task)))?;
        Ok(channel)
    }

    /// Queue a task the caller keeps a reference to
    pub fn post_shared<T: Send + 'static>(&self, task: &Arc<Task<T>>) -> Result<ResultChannel<T>> {
        let channel = task.result_channel();
        let shared: Arc<dyn Runnable> = Arc::clone(task) as Arc<dyn Runnable>;
        self.post_handle(TaskHandle::Shared(shared))?;
        Ok(channel)
    }

    /// Queue an already type-erased task. Returns the worker it was queued on.
    pub fn post_handle(&self, task: TaskHandle) -> Result<WorkerIndex> {
        let stopped = self.shutdown.read();
        if *stopped {
            self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::SchedulerShutdown);
        }
        if task.is_executed() {
            self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::InvalidArgument {
                reason: format!("task {} has already executed", task.id()),
            });
        }

        let index = self.resolve_affinity(&*task);
        let worker = &self.workers[index];
        let id = task.id();

        if worker.push(task).is_err() {
            self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::ResourceExhausted {
                worker: index,
                capacity: worker.queue().capacity(),
            });
        }

        drop(stopped);

        self.tasks_posted.fetch_add(1, Ordering::Relaxed);
        log::trace!("task {} queued on worker {}", id, index);
        Ok(index)
    }

    /// Worker a task would be queued on
    pub fn resolve_affinity(&self, task: &dyn Runnable) -> WorkerIndex {
        let size = self.size();
        match task.affinity() {
            Some(index) if index < size => index,
            _ => task.id().rem_euclid(size as i64) as WorkerIndex,
        }
    }

    /// Index of the worker with the shortest queue, lowest index on ties
    pub fn top_priority_thread(&self) -> WorkerIndex {
        self.workers
            .iter()
            .min_by_key(|w| (w.queue().len(), w.index()))
            .map(|w| w.index())
            .unwrap_or(0)
    }

    /// Pool width
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Per-worker state, for inspection
    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Worker `index`
    pub fn worker(&self, index: WorkerIndex) -> Result<&Arc<Worker>> {
        self.workers.get(index).ok_or(Error::OutOfRange {
            index,
            size: self.size(),
        })
    }

    /// Get a snapshot of the statistics
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            tasks_posted: self.tasks_posted.load(Ordering::Relaxed),
            tasks_rejected: self.tasks_rejected.load(Ordering::Relaxed),
            ..Default::default()
        };
        for worker in self.workers.iter() {
            let counters = worker.stats();
            stats.tasks_executed += counters.tasks_executed.load(Ordering::Relaxed);
            stats.tasks_stolen += counters.tasks_stolen.load(Ordering::Relaxed);
            stats.tasks_queued += worker.queue().len();
        }
        stats
    }

    /// Check if the scheduler is shutting down
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.read()
    }

    /// Stop every worker and join their threads
    ///
    /// Tasks still queued are dropped; their result channels report
    /// [`Error::Abandoned`]. Calling this from a worker thread skips joining
    /// that thread.
    pub fn shutdown(&self) -> Result<()> {
        {
            // Waits out in-flight posts, so every accepted task is queued before the drain.
            let mut stopped = self.shutdown.write();
            if *stopped {
                return Ok(());
            }
            *stopped = true;
        }

        for worker in self.workers.iter() {
            worker.stop();
        }

        let current = thread::current().id();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        let mut panicked = 0;
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                panicked += 1;
            }
        }

        for worker in self.workers.iter() {
            while worker.queue().pop().is_some() {}
        }

        if panicked > 0 {
            return Err(Error::RuntimeError {
                reason: format!("{} worker thread(s) panicked", panicked),
            });
        }

        log::info!("Scheduler shut down successfully");
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("scheduler shutdown failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.size())
            .field("shutdown", &self.is_shutting_down())
            .finish()
    }
}
