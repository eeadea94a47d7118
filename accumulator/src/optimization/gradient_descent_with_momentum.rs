use std::collections::BTreeMap;

use ndarray::Zip;
use serde::{Deserialize, Serialize};

use super::{Optimizer, optimizer::pair_with_grads};
use crate::{
    Result,
    parameters::{Gradients, ParameterSet, Tensor, ensure_same_shape},
};

/// Gradient descent with a velocity term per parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: BTreeMap<String, Tensor>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// The velocity of each parameter is created lazily the first time it gets updated.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: BTreeMap::new(),
        }
    }

    pub fn velocity(&self, param: &str) -> Option<&Tensor> {
        self.velocity.get(param)
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grads: &Gradients, params: &mut ParameterSet) -> Result<()> {
        let pairs = pair_with_grads(grads, params)?;

        for (name, _, param) in &pairs {
            if let Some(v) = self.velocity.get(*name) {
                ensure_same_shape(name, v, param)?;
            }
        }

        let lr = self.learning_rate;
        let mu = self.momentum;

        for (name, grad, param) in pairs {
            let velocity = self
                .velocity
                .entry(name.to_string())
                .or_insert_with(|| Tensor::zeros(param.raw_dim()));

            Zip::from(param)
                .and(grad)
                .and(velocity)
                .for_each(|p, &g, v| {
                    *v = (mu * *v) + g;
                    *p -= lr * *v;
                });
        }

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}
