//! Work-stealing scheduler
//!
//! A fixed pool of worker threads, one bounded lock-free queue per worker.
//! Tasks are routed by affinity (or by id when unbound) and idle workers steal
//! stealable tasks from their peers.

pub mod core;
pub mod queue;
pub mod steal;
pub mod worker;

pub use self::core::{Scheduler, SchedulerConfig, SchedulerStats};
pub use queue::{BoundedQueue, DEFAULT_CAPACITY};
pub use worker::{current_worker, Worker, WorkerStats};
