use super::Tensor;
use crate::{AccumErr, Result};

/// Checks that `got` has the same shape as `expected`.
///
/// # Arguments
/// * `param` - The name of the parameter both tensors belong to, used for reporting.
/// * `got` - The incoming tensor.
/// * `expected` - The reference tensor.
///
/// # Returns
/// A `ShapeMismatch` error naming `param` if the shapes differ.
pub(crate) fn ensure_same_shape(param: &str, got: &Tensor, expected: &Tensor) -> Result<()> {
    if got.shape() != expected.shape() {
        return Err(AccumErr::ShapeMismatch {
            param: param.to_string(),
            got: got.shape().to_vec(),
            expected: expected.shape().to_vec(),
        });
    }

    Ok(())
}
