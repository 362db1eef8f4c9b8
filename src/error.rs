//! Error types for rust-taskflow
//!
//! Scheduler-level failures are returned to the submitting call site. Pipeline
//! state violations are logged and surfaced as return values.

use thiserror::Error;

use crate::pipeline::PipelineState;

/// Main error type for rust-taskflow operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A task handed to the scheduler cannot be run
    #[error("Invalid task: {reason}")]
    InvalidArgument {
        /// Why the task was refused
        reason: String,
    },

    /// The target worker queue has no free slot
    #[error("Queue of worker {worker} is full (capacity {capacity})")]
    ResourceExhausted {
        /// Worker whose queue rejected the push
        worker: usize,
        /// Capacity of that queue
        capacity: usize,
    },

    /// A pipeline operation was attempted outside its required state
    #[error("Cannot {operation} while pipeline is {state:?}")]
    InvalidState {
        /// Name of the rejected operation
        operation: &'static str,
        /// State observed when the operation was rejected
        state: PipelineState,
    },

    /// A worker index is not valid for the current pool
    #[error("Worker index {index} out of range for pool of {size}")]
    OutOfRange {
        /// Requested index
        index: usize,
        /// Pool width
        size: usize,
    },

    /// The scheduler no longer accepts work
    #[error("Scheduler is shutting down")]
    SchedulerShutdown,

    /// The producing side of a result channel went away without a value
    #[error("Task was abandoned before producing a result")]
    Abandoned,

    /// A result channel was fulfilled twice
    #[error("Result channel already fulfilled")]
    AlreadyFulfilled,

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Runtime error
    #[error("Runtime error: {reason}")]
    RuntimeError {
        /// Reason for the runtime error
        reason: String,
    },
}

/// Convenient result type alias
pub type Result<T> = std::result::Result<T, Error>;
