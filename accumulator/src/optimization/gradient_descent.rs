use ndarray::Zip;
use serde::{Deserialize, Serialize};

use super::{Optimizer, optimizer::pair_with_grads};
use crate::{
    Result,
    parameters::{Gradients, ParameterSet},
};

/// Fixed-rate gradient descent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    /// Makes a step in the opposite direction of the gradient, with a length of `learning_rate`.
    fn update_params(&mut self, grads: &Gradients, params: &mut ParameterSet) -> Result<()> {
        let lr = self.learning_rate;

        for (_, grad, param) in pair_with_grads(grads, params)? {
            Zip::from(param).and(grad).for_each(|p, &g| *p -= lr * g);
        }

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}
