use std::collections::BTreeMap;

use ndarray::Zip;
use serde::{Deserialize, Serialize};

use super::{Optimizer, optimizer::pair_with_grads};
use crate::{
    Result,
    parameters::{Gradients, ParameterSet, Tensor, ensure_same_shape},
};

/// Adaptive moment estimation.
///
/// Keeps a first and second moment per parameter and a single pair of bias correction terms,
/// which advance once per `update_params` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    epsilon: f32,
    v: BTreeMap<String, Tensor>,
    s: BTreeMap<String, Tensor>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            epsilon,
            v: BTreeMap::new(),
            s: BTreeMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grads: &Gradients, params: &mut ParameterSet) -> Result<()> {
        let pairs = pair_with_grads(grads, params)?;

        for (name, _, param) in &pairs {
            for moments in [&self.v, &self.s] {
                if let Some(m) = moments.get(*name) {
                    ensure_same_shape(name, m, param)?;
                }
            }
        }

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        for (name, grad, param) in pairs {
            let zeros = || Tensor::zeros(param.raw_dim());
            let v = self.v.entry(name.to_string()).or_insert_with(zeros);
            let s = self.s.entry(name.to_string()).or_insert_with(zeros);

            Zip::from(param)
                .and(grad)
                .and(v)
                .and(s)
                .for_each(|p, &g, v, s| {
                    *v = b1 * *v + (1. - b1) * g;
                    *s = b2 * *s + (1. - b2) * g.powi(2);
                    *p -= step_size * *v / (s.sqrt() + eps);
                });
        }

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}
