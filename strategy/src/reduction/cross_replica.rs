use std::sync::Arc;

use accumulator::Gradients;

use crate::Result;

/// Combines the gradients computed by every replica of a training step into a single one.
#[allow(unused)]
#[trait_variant::make(CrossReplica: Send)]
pub trait CrossReplicaTemplate: Clone {
    /// Should contribute this replica's gradients and wait for the reduced result.
    ///
    /// # Arguments
    /// * `replica` - The id of the calling replica.
    /// * `grads` - The gradients computed by this replica, or `None` if it failed to compute them.
    ///
    /// # Returns
    /// The reduced gradients, identical for every replica, or an error if any replica failed or
    /// their gradients can't be combined.
    async fn all_reduce(&self, replica: usize, grads: Option<Gradients>) -> Result<Arc<Gradients>>;
}
