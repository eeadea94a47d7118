use std::{num::NonZeroUsize, path::Path, sync::Arc};

use accumulator::{
    AccumErr, AccumulatorState, GradientAccumulator, MissingGradients, Optimizer, ParameterSet,
    Reduction,
};
use log::{debug, info};
use ndarray::{Array2, ArrayView2};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Serialize, de::DeserializeOwned};
use strategy::{CrossReplica, LocalReduce, MirroredStrategy};

use crate::{
    Checkpoint, Dataset, FromOptimizerConfig, Result, TrainErr, TrainingConfig,
    model::{Model, mse},
};

/// The summary of a single training epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    /// The amount of epochs run so far, including this one.
    pub epoch: usize,
    /// The mean training loss over the batches of every replica.
    pub loss: f32,
    pub val_loss: Option<f32>,
    /// The amount of accumulator steps taken so far.
    pub steps: u64,
}

#[derive(Debug, Clone, Copy)]
struct EpochSettings {
    accum_steps: usize,
    batch_size: NonZeroUsize,
    accumulation: Reduction,
    missing: MissingGradients,
}

/// The copy of the training state a replica works on during an epoch.
struct Replica<M, O> {
    model: M,
    params: ParameterSet,
    optimizer: O,
    state: AccumulatorState,
}

struct ReplicaOutcome<O> {
    params: ParameterSet,
    optimizer: O,
    state: AccumulatorState,
    loss: f32,
}

impl<M, O> Replica<M, O>
where
    M: Model,
    O: Optimizer + Clone + Send + 'static,
{
    /// Runs every batch of `shard` through the model, reducing the gradients with the other
    /// replicas before handing them to this replica's accumulator.
    async fn train_epoch<R>(
        self,
        id: usize,
        reducer: &R,
        shard: Dataset,
        settings: EpochSettings,
    ) -> Result<ReplicaOutcome<O>>
    where
        R: CrossReplica + Sync,
    {
        let Self {
            model,
            mut params,
            optimizer,
            state,
        } = self;

        let optimizer = Arc::new(Mutex::new(optimizer));
        let mut accumulator = GradientAccumulator::new(Arc::clone(&optimizer), settings.accum_steps)?
            .with_reduction(settings.accumulation)
            .with_missing_gradients(settings.missing);
        accumulator.restore(state)?;

        let mut total_loss = 0.;
        let mut batches = 0;

        for (x, y) in shard.batches(settings.batch_size) {
            let (loss, grads) = match model.loss_and_gradient(&params, x, y) {
                Ok(computed) => computed,
                Err(e) => {
                    // the other replicas are waiting on this contribution
                    let _ = reducer.all_reduce(id, None).await;
                    return Err(e);
                }
            };

            let reduced = reducer.all_reduce(id, Some(grads)).await?;
            let outcome = accumulator.step(&reduced, &mut params)?;
            debug!(
                replica = id,
                step = accumulator.iterations(),
                flushed = outcome.is_flush();
                "replica step"
            );

            total_loss += loss;
            batches += 1;
        }

        let state = accumulator.snapshot();
        let optimizer = optimizer.lock().clone();

        Ok(ReplicaOutcome {
            params,
            optimizer,
            state,
            loss: total_loss / batches.max(1) as f32,
        })
    }
}

/// Drives a model through the accumulator, optionally mirrored over several replicas.
///
/// The trainer owns the reference copy of the training state. Every epoch each replica gets a
/// copy of it, trains on its shard of the data and, since all of them apply the same reduced
/// gradients, they all end up with the same state, which is adopted back.
pub struct Trainer<M, O: Optimizer> {
    model: M,
    params: ParameterSet,
    optimizer: Arc<Mutex<O>>,
    accumulator: GradientAccumulator<O>,
    config: TrainingConfig,
    seed: u64,
    epochs_run: usize,
}

impl<M, O> Trainer<M, O>
where
    M: Model,
    O: Optimizer + Clone + Send + 'static,
{
    /// Creates a new `Trainer` with freshly initialized parameters.
    ///
    /// `config.optimizer` is neither used nor checked, `optimizer` takes its place. Use
    /// `from_config` to build the optimizer out of the configuration instead.
    ///
    /// # Arguments
    /// * `model` - The model to train.
    /// * `optimizer` - The base optimizer to wrap with the accumulator.
    /// * `config` - The configuration of the training session.
    ///
    /// # Returns
    /// A new `Trainer` or an error if the configuration is invalid.
    pub fn new(model: M, optimizer: O, config: &TrainingConfig) -> Result<Self> {
        config.validate_training()?;

        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let params = model.init_params(&mut StdRng::seed_from_u64(seed))?;
        Self::from_parts(model, params, optimizer, config, seed)
    }

    /// Creates a new `Trainer` whose base optimizer is the one `config.optimizer` describes.
    ///
    /// # Returns
    /// A new `Trainer` or an `InvalidConfig` error if the configuration is invalid or describes
    /// another kind of optimizer than `O`.
    pub fn from_config(model: M, config: &TrainingConfig) -> Result<Self>
    where
        O: FromOptimizerConfig,
    {
        config.validate()?;
        let optimizer = O::from_config(&config.optimizer)?;
        Self::new(model, optimizer, config)
    }

    fn from_parts(
        model: M,
        params: ParameterSet,
        optimizer: O,
        config: &TrainingConfig,
        seed: u64,
    ) -> Result<Self> {
        let optimizer = Arc::new(Mutex::new(optimizer));
        let accumulator = GradientAccumulator::new(Arc::clone(&optimizer), config.accum_steps)?
            .with_reduction(config.accumulation)
            .with_missing_gradients(config.missing_gradients);

        Ok(Self {
            model,
            params,
            optimizer,
            accumulator,
            config: config.clone(),
            seed,
            epochs_run: 0,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Returns a new handle to the base optimizer.
    pub fn optimizer(&self) -> Arc<Mutex<O>> {
        Arc::clone(&self.optimizer)
    }

    pub fn accumulator(&self) -> &GradientAccumulator<O> {
        &self.accumulator
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn epochs_run(&self) -> usize {
        self.epochs_run
    }

    /// Trains the model for the configured amount of epochs.
    ///
    /// The accumulation window carries over epochs and calls to `fit`, only `reset` on the
    /// accumulator discards it.
    ///
    /// # Arguments
    /// * `train` - The training data, shuffled every epoch and sharded across replicas.
    /// * `validation` - Optional data to evaluate on after every epoch.
    ///
    /// # Returns
    /// The stats of every epoch or the first error any replica ran into.
    pub async fn fit(
        &mut self,
        train: &Dataset,
        validation: Option<&Dataset>,
    ) -> Result<Vec<EpochStats>> {
        let strategy = MirroredStrategy::new(self.config.replicas.get(), self.config.cross_replica)?;
        let settings = EpochSettings {
            accum_steps: self.config.accum_steps,
            batch_size: self.config.batch_size,
            accumulation: self.config.accumulation,
            missing: self.config.missing_gradients,
        };

        let epochs = self.config.epochs.get();
        let mut history = Vec::with_capacity(epochs);

        for _ in 0..epochs {
            let mut data = train.clone();
            data.shuffle(&mut StdRng::seed_from_u64(
                self.seed.wrapping_add(self.epochs_run as u64 + 1),
            ));

            let outcome = if strategy.replicas() == 1 {
                self.replica()
                    .train_epoch(0, &LocalReduce, data, settings)
                    .await?
            } else {
                self.train_mirrored(&strategy, &data, settings).await?
            };

            let loss = outcome.loss;
            self.adopt(outcome)?;
            self.epochs_run += 1;

            let val_loss = validation.map(|data| self.evaluate(data)).transpose()?;
            let stats = EpochStats {
                epoch: self.epochs_run,
                loss,
                val_loss,
                steps: self.accumulator.iterations(),
            };

            info!(
                epoch = stats.epoch,
                loss = stats.loss,
                steps = stats.steps,
                pending = self.accumulator.pending();
                "finished epoch"
            );
            if let Some(val_loss) = val_loss {
                info!(epoch = stats.epoch, val_loss = val_loss; "validated epoch");
            }

            history.push(stats);
        }

        Ok(history)
    }

    fn replica(&self) -> Replica<M, O> {
        Replica {
            model: self.model.clone(),
            params: self.params.clone(),
            optimizer: self.optimizer.lock().clone(),
            state: self.accumulator.snapshot(),
        }
    }

    async fn train_mirrored(
        &self,
        strategy: &MirroredStrategy,
        data: &Dataset,
        settings: EpochSettings,
    ) -> Result<ReplicaOutcome<O>> {
        let shards = data.shard(self.config.replicas)?;

        let outcomes = strategy
            .run(|ctx| {
                let replica = self.replica();
                let shard = shards[ctx.id].clone();
                async move {
                    replica
                        .train_epoch(ctx.id, &ctx.reducer, shard, settings)
                        .await
                }
            })
            .await?
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let mut outcomes = outcomes.into_iter();
        let Some(mut primary) = outcomes.next() else {
            return Err(TrainErr::InvalidConfig {
                what: "replicas",
                reason: "no replica ran".to_string(),
            });
        };

        let mut total_loss = primary.loss;
        for (replica, outcome) in outcomes.enumerate() {
            if outcome.params != primary.params || outcome.state != primary.state {
                return Err(TrainErr::ReplicaDivergence {
                    replica: replica + 1,
                });
            }
            total_loss += outcome.loss;
        }

        primary.loss = total_loss / strategy.replicas() as f32;
        Ok(primary)
    }

    fn adopt(&mut self, outcome: ReplicaOutcome<O>) -> Result<()> {
        self.params = outcome.params;
        *self.optimizer.lock() = outcome.optimizer;
        self.accumulator.restore(outcome.state)?;
        Ok(())
    }

    /// Computes the predictions of the model for a batch of inputs.
    pub fn predict(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.model.forward(&self.params, x)
    }

    /// Computes the mean squared error of the model over `data`.
    pub fn evaluate(&self, data: &Dataset) -> Result<f32> {
        let y_pred = self.predict(data.x())?;
        if y_pred.dim() != data.y().dim() {
            return Err(TrainErr::SizeMismatch {
                a: "y",
                b: "predictions",
                got: data.outputs(),
                expected: y_pred.ncols(),
            });
        }

        Ok(mse(y_pred.view(), data.y()))
    }
}

impl<M, O> Trainer<M, O>
where
    M: Model,
    O: Optimizer + Clone + Send + Serialize + DeserializeOwned + 'static,
{
    /// Captures the current training state, including a partially filled accumulation window.
    pub fn checkpoint(&self) -> Checkpoint<O> {
        Checkpoint {
            params: self.params.clone(),
            optimizer: self.optimizer.lock().clone(),
            accumulator: self.accumulator.snapshot(),
            epoch: self.epochs_run,
            seed: self.seed,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.checkpoint().save(path)
    }

    /// Loads a `Trainer` from a checkpoint written by `save`.
    ///
    /// # Arguments
    /// * `path` - Where the checkpoint was saved.
    /// * `model` - The model the checkpoint was trained with.
    /// * `config` - The configuration to continue training with, its `accum_steps` must match
    ///   the one of the checkpoint. Its `seed` is ignored in favor of the checkpoint's one.
    ///
    /// # Returns
    /// The restored `Trainer` or an error if the checkpoint can't be read or doesn't fit `model`.
    pub fn load(path: impl AsRef<Path>, model: M, config: &TrainingConfig) -> Result<Self> {
        let checkpoint = Checkpoint::load(path)?;
        Self::from_checkpoint(checkpoint, model, config)
    }

    pub fn from_checkpoint(
        checkpoint: Checkpoint<O>,
        model: M,
        config: &TrainingConfig,
    ) -> Result<Self> {
        config.validate_training()?;

        // only the names and shapes of the layout are used
        let layout = model.init_params(&mut StdRng::seed_from_u64(0))?;
        ensure_compatible(&layout, &checkpoint.params)?;

        let mut trainer = Self::from_parts(
            model,
            checkpoint.params,
            checkpoint.optimizer,
            config,
            checkpoint.seed,
        )?;
        trainer.accumulator.restore(checkpoint.accumulator)?;
        trainer.epochs_run = checkpoint.epoch;

        debug!(epoch = trainer.epochs_run, seed = trainer.seed; "restored trainer");
        Ok(trainer)
    }
}

/// Checks that `params` holds exactly the parameters of `expected`, with the same shapes.
fn ensure_compatible(expected: &ParameterSet, params: &ParameterSet) -> Result<()> {
    if let Some(param) = params.names().find(|name| !expected.contains(name)) {
        return Err(AccumErr::UnknownParameter {
            param: param.to_string(),
        }
        .into());
    }

    for (name, tensor) in expected {
        let got = params.get(name).ok_or_else(|| AccumErr::MissingParameter {
            param: name.clone(),
            from: "checkpoint",
        })?;

        if got.shape() != tensor.shape() {
            return Err(AccumErr::ShapeMismatch {
                param: name.clone(),
                got: got.shape().to_vec(),
                expected: tensor.shape().to_vec(),
            }
            .into());
        }
    }

    Ok(())
}
