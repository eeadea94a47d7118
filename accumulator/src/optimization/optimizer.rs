use crate::{
    AccumErr, Result,
    parameters::{Gradients, ParameterSet, Tensor, ensure_same_shape},
};

/// Defines the strategy for updating model parameters based on calculated gradients.
///
/// The `Optimizer` trait is responsible for the mathematical transition of the parameters from
/// state `t` to `t+1`. A `GradientAccumulator` calls it once per accumulation window.
pub trait Optimizer {
    /// Updates the provided parameters using the given gradients.
    ///
    /// # Arguments
    /// * `grads` - One gradient per parameter in `params`.
    /// * `params` - The parameters to update in place.
    ///
    /// # Returns
    /// An error if a parameter has no gradient, a gradient belongs to no parameter or there's a
    /// shape mismatch between a gradient and its parameter.
    fn update_params(&mut self, grads: &Gradients, params: &mut ParameterSet) -> Result<()>;

    /// Returns the learning rate currently used by the optimizer.
    fn learning_rate(&self) -> f32;
}

impl<T: Optimizer + ?Sized> Optimizer for Box<T> {
    fn update_params(&mut self, grads: &Gradients, params: &mut ParameterSet) -> Result<()> {
        (**self).update_params(grads, params)
    }

    fn learning_rate(&self) -> f32 {
        (**self).learning_rate()
    }
}

/// Pairs every parameter with its gradient.
///
/// Every name and shape is validated before returning, so an optimizer can iterate over the
/// result and mutate the parameters knowing no error will show up halfway through.
///
/// # Arguments
/// * `grads` - The incoming gradients.
/// * `params` - The parameters to pair them with.
///
/// # Returns
/// A list of `(name, grad, param)` triplets in the parameters' order.
pub(super) fn pair_with_grads<'a>(
    grads: &'a Gradients,
    params: &'a mut ParameterSet,
) -> Result<Vec<(&'a str, &'a Tensor, &'a mut Tensor)>> {
    if let Some(name) = grads.names().find(|name| !params.contains(name)) {
        return Err(AccumErr::UnknownParameter {
            param: name.to_string(),
        });
    }

    let mut pairs = Vec::with_capacity(params.len());

    for (name, param) in params.iter_mut() {
        let grad = grads
            .get(name)
            .ok_or_else(|| AccumErr::MissingParameter {
                param: name.clone(),
                from: "gradients",
            })?;

        ensure_same_shape(name, grad, param)?;
        pairs.push((name.as_str(), grad, param));
    }

    Ok(pairs)
}
