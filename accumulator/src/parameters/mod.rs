mod named;
mod shape;

pub use named::{Gradients, NamedTensors, ParameterSet, Tensor};
pub(crate) use shape::ensure_same_shape;
