mod accumulator;
mod config;
mod handle;
mod state;

pub use accumulator::GradientAccumulator;
pub use config::{MissingGradients, Reduction};
pub use handle::AccumulatorHandle;
pub use state::{AccumulatorState, StepOutcome};
