use accumulator::{AccumErr, Gradients, ParameterSet};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Ix1, Ix2};
use rand::Rng;
use rand_distr::{Distribution, Uniform};

use super::Model;
use crate::{Result, TrainErr};

pub const KERNEL: &str = "dense/kernel";
pub const BIAS: &str = "dense/bias";

/// A single dense layer without activation, trained with the mean squared error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Linear {
    inputs: usize,
    outputs: usize,
}

impl Linear {
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self { inputs, outputs }
    }

    /// Gives a view of the kernel and the bias in `params`, checking their shapes.
    fn view_params<'a>(
        &self,
        params: &'a ParameterSet,
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let get = move |name: &str| {
            params.get(name).ok_or_else(|| AccumErr::MissingParameter {
                param: name.to_string(),
                from: "parameters",
            })
        };

        let w = get(KERNEL)?.view().into_dimensionality::<Ix2>()?;
        let b = get(BIAS)?.view().into_dimensionality::<Ix1>()?;

        if w.dim() != (self.inputs, self.outputs) || b.len() != self.outputs {
            return Err(AccumErr::ShapeMismatch {
                param: KERNEL.to_string(),
                got: [w.shape(), b.shape()].concat(),
                expected: vec![self.inputs, self.outputs, self.outputs],
            }
            .into());
        }

        Ok((w, b))
    }

    fn check_inputs(&self, x: ArrayView2<f32>) -> Result<()> {
        if x.ncols() != self.inputs {
            return Err(TrainErr::SizeMismatch {
                a: "x",
                b: "model inputs",
                got: x.ncols(),
                expected: self.inputs,
            });
        }

        Ok(())
    }
}

impl Model for Linear {
    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ParameterSet> {
        let range = (6. / (self.inputs + self.outputs) as f32).sqrt();
        let xavier = Uniform::new(-range, range)?;

        let w = Array2::from_shape_fn((self.inputs, self.outputs), |_| xavier.sample(&mut *rng));
        let b = Array1::<f32>::zeros(self.outputs);

        Ok(ParameterSet::new()
            .with(KERNEL, w.into_dyn())
            .with(BIAS, b.into_dyn()))
    }

    fn forward(&self, params: &ParameterSet, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_inputs(x)?;
        let (w, b) = self.view_params(params)?;
        Ok(x.dot(&w) + &b)
    }

    fn loss_and_gradient(
        &self,
        params: &ParameterSet,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<(f32, Gradients)> {
        let y_pred = self.forward(params, x)?;
        if y_pred.dim() != y.dim() {
            return Err(TrainErr::SizeMismatch {
                a: "y",
                b: "predictions",
                got: y.len(),
                expected: y_pred.len(),
            });
        }

        let diff = y_pred - y;
        let loss = diff.mapv(|d| d.powi(2)).mean().unwrap_or_default();
        let d = diff * (2.0 / y.len().max(1) as f32);

        let dw = x.t().dot(&d);
        let db = d.sum_axis(Axis(0));

        let grads = Gradients::new()
            .with(KERNEL, dw.into_dyn())
            .with(BIAS, db.into_dyn());

        Ok((loss, grads))
    }
}

/// Mean squared error between predictions and targets.
pub fn mse(y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
    (&y_pred - &y).mapv(|x| x.powi(2)).mean().unwrap_or_default()
}
