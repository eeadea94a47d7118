pub mod accumulation;
pub mod error;
pub mod optimization;
pub mod parameters;

pub use accumulation::{
    AccumulatorHandle, AccumulatorState, GradientAccumulator, MissingGradients, Reduction,
    StepOutcome,
};
pub use error::{AccumErr, Result};
pub use optimization::Optimizer;
pub use parameters::{Gradients, NamedTensors, ParameterSet, Tensor};
