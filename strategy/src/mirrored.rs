use std::future::Future;

use accumulator::Reduction;
use log::{debug, warn};
use tokio::task::JoinSet;

use crate::{AllReduce, Result, StrategyErr};

/// What a replica knows about itself and how to reach its siblings.
#[derive(Debug, Clone)]
pub struct ReplicaContext {
    pub id: usize,
    pub replicas: usize,
    pub reducer: AllReduce,
}

/// A data-parallel strategy that runs one copy of the same computation per replica, all of them
/// in the same process as tokio tasks, keeping them in lockstep through an `AllReduce`.
#[derive(Debug, Clone, Copy)]
pub struct MirroredStrategy {
    replicas: usize,
    reduction: Reduction,
}

impl MirroredStrategy {
    /// Creates a new `MirroredStrategy`.
    ///
    /// # Arguments
    /// * `replicas` - The amount of replicas to run.
    /// * `reduction` - How the gradients of the replicas are combined every step.
    ///
    /// # Returns
    /// A new `MirroredStrategy` or an `InvalidConfig` error if `replicas` is zero.
    pub fn new(replicas: usize, reduction: Reduction) -> Result<Self> {
        if replicas == 0 {
            return Err(StrategyErr::InvalidConfig {
                what: "replicas",
                reason: "must be a positive integer, got 0".to_string(),
            });
        }

        Ok(Self {
            replicas,
            reduction,
        })
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Runs `f` once per replica, concurrently.
    ///
    /// Every call gets its own `ReplicaContext`, and all of them share a fresh `AllReduce`. If a
    /// replica panics or is cancelled, the others are aborted, since they would otherwise wait
    /// on the barrier for a contribution that never comes.
    ///
    /// # Arguments
    /// * `f` - Builds the future each replica runs.
    ///
    /// # Returns
    /// The output of every replica in replica order, or a `Join` error if a replica task panicked
    /// or was cancelled.
    pub async fn run<F, Fut, T>(&self, f: F) -> Result<Vec<T>>
    where
        F: Fn(ReplicaContext) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let reducer = AllReduce::new(self.replicas, self.reduction);
        debug!(replicas = self.replicas; "spawning replicas");

        let mut tasks = JoinSet::new();
        for id in 0..self.replicas {
            let ctx = ReplicaContext {
                id,
                replicas: self.replicas,
                reducer: reducer.clone(),
            };
            let replica = f(ctx);
            tasks.spawn(async move { (id, replica.await) });
        }

        let mut outputs: Vec<Option<T>> = (0..self.replicas).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, output)) => outputs[id] = Some(output),
                Err(e) => {
                    warn!(running = tasks.len(); "a replica task failed, aborting the rest");
                    tasks.abort_all();
                    return Err(StrategyErr::Join(e.to_string()));
                }
            }
        }

        Ok(outputs.into_iter().flatten().collect())
    }
}
