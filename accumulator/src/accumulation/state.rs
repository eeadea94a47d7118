use serde::{Deserialize, Serialize};

use crate::parameters::NamedTensors;

/// A snapshot of everything a `GradientAccumulator` needs to resume an accumulation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorState {
    /// The window size the snapshot was taken with.
    pub accum_steps: usize,
    /// The amount of steps taken since construction or the last reset.
    pub iterations: u64,
    /// The sum of the gradients since the last flush, one entry per parameter seen so far.
    pub buffers: NamedTensors,
}

/// What a single `GradientAccumulator::step` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The gradients were accumulated and the parameters were left untouched.
    Accumulated {
        /// The amount of steps accumulated in the current window.
        pending: usize,
    },
    /// The window was completed and the aggregated update was applied.
    Flushed,
}

impl StepOutcome {
    pub fn is_flush(self) -> bool {
        matches!(self, StepOutcome::Flushed)
    }
}
