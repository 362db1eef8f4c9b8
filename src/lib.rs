//! # rust-taskflow
//!
//! A work-stealing thread pool with bounded lock-free queues, and pipeline
//! state machines that drive sequences of activities through it.
//!
//! ## Features
//!
//! - **Scheduler**: fixed pool of worker threads, one bounded queue each, with
//!   affinity-based routing and round-robin work stealing
//! - **Tasks**: single-shot, type-erased units of work that run at most once
//! - **Result channels**: one-shot promise/future pairs with blocking, polling
//!   and async access
//! - **Pipelines**: auto, manual, manual-steps, manual-key and concurrent
//!   execution policies over a Waiting/Busy/Ready lifecycle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_taskflow::prelude::*;
//!
//! let scheduler = Scheduler::new(SchedulerConfig::with_workers(4)).unwrap();
//!
//! // Run a single task
//! let answer = scheduler.post(Task::new(|| 6 * 7)).unwrap();
//! assert_eq!(answer.get().unwrap(), 42);
//!
//! // Run a pipeline
//! let pipeline = AutoChain::new(scheduler.clone());
//! pipeline.add(Activity::new(|| 1 - 2));
//! pipeline.add(Activity::new(|| 10 - 1));
//! pipeline.execute(ExecuteMode::Async).unwrap().get().unwrap();
//! assert_eq!(pipeline.result::<i32>(1), Some(9));
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod channel;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod task;

/// Convenient re-exports for common functionality
pub mod prelude {
    pub use crate::channel::{channel, ResultChannel, ResultSender};
    pub use crate::error::{Error, Result};
    pub use crate::pipeline::{
        Activity, AutoChain, ConcurrentPipeline, ExecuteMode, ExecutionPolicy, ManualChain,
        ManualKeyChain, ManualStepsChain, Pipeline, PipelineEvent, PipelineState, Value,
    };
    pub use crate::scheduler::{current_worker, Scheduler, SchedulerConfig, SchedulerStats};
    pub use crate::task::{Runnable, Task, TaskHandle, TaskId, WorkerIndex};
}

// Re-export the prelude at crate root for convenience
pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_post_test() {
        let scheduler = Scheduler::new(SchedulerConfig::with_workers(1)).unwrap();
        let channel = scheduler.post(Task::new(|| "hello from worker".to_string())).unwrap();
        assert_eq!(channel.get().unwrap(), "hello from worker");
    }
}
