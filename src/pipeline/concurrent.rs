//! Concurrent pipeline: every activity is posted at once
//!
//! Each remaining activity becomes its own task on the scheduler. Completions
//! are matched back to their slot by task id as they arrive, in any order, and
//! the pipeline is Ready once the last one lands. An activity whose task never
//! completes leaves the pipeline Busy.

use super::core::{ExecutionPolicy, Step, StepContext};
use super::PipelineState;

/// Runs every remaining activity in parallel
#[derive(Debug, Default, Clone, Copy)]
pub struct Concurrent;

impl ExecutionPolicy for Concurrent {
    type Settings = ();

    fn step(&mut self, _settings: &(), ctx: &StepContext<'_>) -> Step {
        if ctx.dispatch(ctx.start_index()) == 0 {
            Step::Done(PipelineState::Ready)
        } else {
            Step::Pending
        }
    }
}
