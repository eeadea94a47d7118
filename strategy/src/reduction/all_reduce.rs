use std::sync::Arc;

use accumulator::{AccumErr, Gradients, Reduction};
use log::{debug, warn};
use parking_lot::Mutex;
use rayon::prelude::*;
use tokio::sync::Barrier;

use super::CrossReplica;
use crate::{Result, StrategyErr};

#[derive(Debug)]
struct RoundState {
    sum: Option<Gradients>,
    error: Option<StrategyErr>,
    outcome: Result<Arc<Gradients>>,
    round: u64,
}

/// Reduces the gradients of a fixed amount of replicas using a barrier.
///
/// Every round, each replica adds its gradients into a shared sum and waits on the barrier. The
/// leader then finalizes the sum and, after a second wait, every replica reads the same result.
/// A round fails as a whole: if any replica contributes `None` or a gradient that can't be added,
/// every replica gets the error, so none of them keeps waiting on the barrier.
#[derive(Debug, Clone)]
pub struct AllReduce {
    replicas: usize,
    reduction: Reduction,
    barrier: Arc<Barrier>,
    state: Arc<Mutex<RoundState>>,
}

impl AllReduce {
    /// Creates a new `AllReduce`.
    ///
    /// # Arguments
    /// * `replicas` - The amount of replicas to wait on every round.
    /// * `reduction` - How the gradients of the replicas are combined.
    ///
    /// # Returns
    /// A new `AllReduce` instance.
    pub fn new(replicas: usize, reduction: Reduction) -> Self {
        Self {
            replicas,
            reduction,
            barrier: Arc::new(Barrier::new(replicas)),
            state: Arc::new(Mutex::new(RoundState {
                sum: None,
                error: None,
                outcome: Ok(Arc::new(Gradients::new())),
                round: 0,
            })),
        }
    }

    fn contribute(&self, replica: usize, grads: Option<Gradients>) {
        let mut state = self.state.lock();
        if state.error.is_some() {
            return;
        }

        let Some(grads) = grads else {
            warn!(replica = replica; "replica failed to compute its gradients");
            state.error = Some(StrategyErr::ReplicaFailed { replica });
            return;
        };

        let state = &mut *state;
        if let Some(sum) = state.sum.as_mut() {
            if let Err(e) = add_into(sum, &grads, replica) {
                state.error = Some(e);
            }
        } else {
            state.sum = Some(grads);
        }
    }

    fn finalize(&self) {
        let mut state = self.state.lock();
        state.round += 1;

        let sum = state.sum.take();
        state.outcome = match (state.error.take(), sum) {
            (Some(e), _) => Err(e),
            (None, Some(mut sum)) => {
                sum.scale(self.reduction.factor(self.replicas));
                Ok(Arc::new(sum))
            }
            (None, None) => Ok(Arc::new(Gradients::new())),
        };

        debug!(round = state.round, ok = state.outcome.is_ok(); "finalized reduction round");
    }
}

impl CrossReplica for AllReduce {
    async fn all_reduce(&self, replica: usize, grads: Option<Gradients>) -> Result<Arc<Gradients>> {
        self.contribute(replica, grads);

        if self.barrier.wait().await.is_leader() {
            self.finalize();
        }

        self.barrier.wait().await;
        self.state.lock().outcome.clone()
    }
}

/// Adds `grads` into `sum` parameter-wise, checking first that both hold the same parameters with
/// the same shapes, so `sum` is left untouched on error.
fn add_into(sum: &mut Gradients, grads: &Gradients, replica: usize) -> Result<()> {
    if let Some(param) = grads.names().find(|name| !sum.contains(name)) {
        return Err(AccumErr::UnknownParameter {
            param: param.to_string(),
        }
        .into());
    }

    for (name, total) in sum.iter() {
        let grad = grads.get(name).ok_or_else(|| AccumErr::MissingParameter {
            param: name.clone(),
            from: "replica gradients",
        })?;

        if grad.shape() != total.shape() {
            return Err(StrategyErr::ShapeMismatch {
                param: name.clone(),
                replica,
                got: grad.shape().to_vec(),
                expected: total.shape().to_vec(),
            });
        }
    }

    sum.as_map_mut().par_iter_mut().for_each(|(name, total)| {
        if let Some(grad) = grads.get(name) {
            *total += grad;
        }
    });

    Ok(())
}
