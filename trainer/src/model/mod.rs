mod linear;

use accumulator::{Gradients, ParameterSet};
use ndarray::{Array2, ArrayView2};
use rand::Rng;

pub use linear::{BIAS, KERNEL, Linear, mse};

use crate::Result;

/// A differentiable model over named parameters.
///
/// Models hold no parameters themselves, they only describe how to initialize and use a
/// `ParameterSet`, so every replica can share the same model definition.
pub trait Model: Clone + Send + Sync + 'static {
    /// Builds a fresh set of parameters for this model.
    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ParameterSet>;

    /// Computes the predictions for a batch of inputs.
    ///
    /// # Arguments
    /// * `params` - The parameters to evaluate the model with.
    /// * `x` - The inputs, one sample per row.
    ///
    /// # Returns
    /// The predictions, one sample per row.
    fn forward(&self, params: &ParameterSet, x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Computes the loss of a batch and its gradient with respect to every parameter.
    ///
    /// # Arguments
    /// * `params` - The parameters to evaluate the model with.
    /// * `x` - The inputs, one sample per row.
    /// * `y` - The expected outputs, one sample per row.
    ///
    /// # Returns
    /// The loss and the gradients, named like the parameters.
    fn loss_and_gradient(
        &self,
        params: &ParameterSet,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<(f32, Gradients)>;
}
