use std::sync::Arc;

use accumulator::Gradients;

use super::CrossReplica;
use crate::{Result, StrategyErr};

/// The reduction of a single replica, which hands its own gradients back.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalReduce;

impl CrossReplica for LocalReduce {
    async fn all_reduce(&self, replica: usize, grads: Option<Gradients>) -> Result<Arc<Gradients>> {
        grads
            .map(Arc::new)
            .ok_or(StrategyErr::ReplicaFailed { replica })
    }
}
