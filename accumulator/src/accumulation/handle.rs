use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{AccumulatorState, GradientAccumulator, StepOutcome};
use crate::{
    Result,
    optimization::Optimizer,
    parameters::{Gradients, ParameterSet},
};

/// A clonable handle that lets several threads of the same process drive a single accumulator.
///
/// Buffer additions are not atomic, so every mutation is serialized through a lock. The
/// parameters live behind a `RwLock` so readers only wait on steps, never on each other.
pub struct AccumulatorHandle<O: Optimizer> {
    accumulator: Arc<Mutex<GradientAccumulator<O>>>,
    params: Arc<RwLock<ParameterSet>>,
}

impl<O: Optimizer> Clone for AccumulatorHandle<O> {
    fn clone(&self) -> Self {
        Self {
            accumulator: Arc::clone(&self.accumulator),
            params: Arc::clone(&self.params),
        }
    }
}

impl<O: Optimizer> AccumulatorHandle<O> {
    /// Creates a new `AccumulatorHandle`.
    ///
    /// # Arguments
    /// * `accumulator` - The accumulator to share.
    /// * `params` - The parameters it updates.
    ///
    /// # Returns
    /// A new `AccumulatorHandle` instance.
    pub fn new(accumulator: GradientAccumulator<O>, params: ParameterSet) -> Self {
        Self {
            accumulator: Arc::new(Mutex::new(accumulator)),
            params: Arc::new(RwLock::new(params)),
        }
    }

    /// Locked call to `GradientAccumulator::step` over the shared parameters.
    pub fn step(&self, grads: &Gradients) -> Result<StepOutcome> {
        let mut accumulator = self.accumulator.lock();
        let mut params = self.params.write();
        accumulator.step(grads, &mut params)
    }

    /// Copies the current state of the parameters.
    pub fn pull_params(&self) -> ParameterSet {
        self.params.read().clone()
    }

    pub fn reset(&self) {
        self.accumulator.lock().reset();
    }

    pub fn snapshot(&self) -> AccumulatorState {
        self.accumulator.lock().snapshot()
    }

    pub fn restore(&self, state: AccumulatorState) -> Result<()> {
        self.accumulator.lock().restore(state)
    }

    pub fn iterations(&self) -> u64 {
        self.accumulator.lock().iterations()
    }
}
