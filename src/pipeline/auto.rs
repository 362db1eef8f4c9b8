//! Auto chain: one `execute()` drains the pipeline

use super::core::{ExecutionPolicy, Step, StepContext};
use super::PipelineState;

/// Runs every activity from the start index to the end, in order
#[derive(Debug, Default, Clone, Copy)]
pub struct Auto;

impl ExecutionPolicy for Auto {
    type Settings = ();

    fn step(&mut self, _settings: &(), ctx: &StepContext<'_>) -> Step {
        let mut index = ctx.start_index();
        while index < ctx.len() {
            ctx.run_activity(index);
            index += 1;
        }
        Step::Done(PipelineState::Ready)
    }
}
