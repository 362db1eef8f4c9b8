//! Pipelines
//!
//! A pipeline is an ordered list of [`Activity`]s driven through a
//! Waiting → Busy → Ready lifecycle on a [`Scheduler`](crate::scheduler::Scheduler).
//! Five policies decide what each `execute()` call runs:
//!
//! | Pipeline               | One `execute()` runs                                  |
//! |------------------------|-------------------------------------------------------|
//! | [`AutoChain`]          | every remaining activity, in order                    |
//! | [`ManualChain`]        | the next activity                                     |
//! | [`ManualStepsChain`]   | the next `steps` activities                           |
//! | [`ManualKeyChain`]     | the next activity, pausing at the key activity        |
//! | [`ConcurrentPipeline`] | every remaining activity at once, on the scheduler    |

pub mod activity;
pub mod auto;
pub mod concurrent;
pub mod core;
pub mod manual;

pub use self::core::{ExecutionPolicy, Pipeline, Step, StepContext};
pub use activity::{Activity, Value};
pub use auto::Auto;
pub use concurrent::Concurrent;
pub use manual::{KeySettings, Manual, ManualKey, ManualSteps, StepsSettings};

/// Runs every activity once per `execute()`
pub type AutoChain = Pipeline<Auto>;
/// Runs one activity per `execute()`
pub type ManualChain = Pipeline<Manual>;
/// Runs a fixed number of activities per `execute()`
pub type ManualStepsChain = Pipeline<ManualSteps>;
/// Runs one activity per `execute()` and holds at a key activity
pub type ManualKeyChain = Pipeline<ManualKey>;
/// Posts every activity to the scheduler at once
pub type ConcurrentPipeline = Pipeline<Concurrent>;

/// Pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PipelineState {
    /// Activities may be added or removed; `execute()` is accepted
    Waiting = 0,
    /// An execution is in flight
    Busy = 1,
    /// Every activity of the run has completed
    Ready = 2,
}

impl PipelineState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Waiting,
            1 => PipelineState::Busy,
            _ => PipelineState::Ready,
        }
    }
}

/// Where `execute()` runs the policy's step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecuteMode {
    /// On the calling thread, before `execute()` returns
    Sync,
    /// On a worker, through a runner task
    #[default]
    Async,
}

/// Notification delivered to [`Pipeline::subscribe`] receivers
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The pipeline entered a new state
    StateChanged(PipelineState),
    /// An activity finished and its result was stored
    ActivityCompleted {
        /// Position of the activity
        index: usize,
        /// What it returned
        value: Value,
    },
}
