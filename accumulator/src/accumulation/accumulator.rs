use std::{num::NonZeroUsize, sync::Arc};

use log::debug;
use parking_lot::Mutex;

use super::{AccumulatorState, MissingGradients, Reduction, StepOutcome};
use crate::{
    AccumErr, Result,
    optimization::Optimizer,
    parameters::{Gradients, NamedTensors, ParameterSet, Tensor, ensure_same_shape},
};

/// Wraps a base optimizer so that it receives one aggregated gradient every `accum_steps`
/// calls to `step`, while still being driven once per mini-batch.
///
/// The accumulator is always in one of two states: accumulating, where incoming gradients are
/// added to the buffers and the parameters are left untouched, or flushing, which only happens
/// inside the `step` call that completes a window. Flushing invokes the base optimizer with the
/// combined gradient, zeroes the buffers and goes back to accumulating.
///
/// Gradients are summed by default, so the update applied per window is `accum_steps` times the
/// update of a single averaged step. Use `Reduction::Mean` or scale the learning rate to
/// compensate. Since the base optimizer is invoked once per window, stateful optimizers
/// (momentum, adaptive moments) advance their state once per window as well.
#[derive(Debug)]
pub struct GradientAccumulator<O: Optimizer> {
    optimizer: Arc<Mutex<O>>,
    accum_steps: NonZeroUsize,
    reduction: Reduction,
    missing: MissingGradients,
    buffers: NamedTensors,
    iterations: u64,
}

impl<O: Optimizer> GradientAccumulator<O> {
    /// Creates a new `GradientAccumulator`.
    ///
    /// # Arguments
    /// * `optimizer` - The base optimizer, shared with the caller, who owns its lifecycle.
    /// * `accum_steps` - The amount of steps per accumulation window.
    ///
    /// # Returns
    /// A new `GradientAccumulator` or an `InvalidConfig` error if `accum_steps` is zero.
    pub fn new(optimizer: Arc<Mutex<O>>, accum_steps: usize) -> Result<Self> {
        let accum_steps = NonZeroUsize::new(accum_steps).ok_or_else(|| AccumErr::InvalidConfig {
            what: "accum_steps",
            reason: "must be a positive integer, got 0".to_string(),
        })?;

        Ok(Self {
            optimizer,
            accum_steps,
            reduction: Reduction::default(),
            missing: MissingGradients::default(),
            buffers: NamedTensors::new(),
            iterations: 0,
        })
    }

    /// Sets how the gradients of a window are combined before being applied.
    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    /// Sets the policy for parameters that don't receive a gradient in a step.
    pub fn with_missing_gradients(mut self, missing: MissingGradients) -> Self {
        self.missing = missing;
        self
    }

    /// Returns a new handle to the wrapped optimizer.
    pub fn optimizer(&self) -> Arc<Mutex<O>> {
        Arc::clone(&self.optimizer)
    }

    pub fn accum_steps(&self) -> usize {
        self.accum_steps.get()
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Returns the amount of successful steps since construction or the last reset.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Returns the amount of steps accumulated in the current window.
    pub fn pending(&self) -> usize {
        (self.iterations % self.accum_steps.get() as u64) as usize
    }

    /// Returns the accumulation buffer of a parameter, if it was seen already.
    pub fn buffer(&self, param: &str) -> Option<&Tensor> {
        self.buffers.get(param)
    }

    pub fn buffers(&self) -> &NamedTensors {
        &self.buffers
    }

    /// Takes a training step.
    ///
    /// The gradients are added into the accumulation buffers. If this step completes the window,
    /// the base optimizer is invoked with the combined gradient and the buffers are zeroed.
    ///
    /// The call is atomic with respect to the accumulator: if it fails, the buffers and the
    /// step counter are the same as before calling it.
    ///
    /// # Arguments
    /// * `grads` - The gradients of this step, one per trainable parameter.
    /// * `params` - The parameters, only modified when the window is completed.
    ///
    /// # Returns
    /// What the step did, or an error if the gradients don't match the parameters or the base
    /// optimizer failed.
    pub fn step(&mut self, grads: &Gradients, params: &mut ParameterSet) -> Result<StepOutcome> {
        self.validate(grads, params)?;

        let steps = self.accum_steps.get();
        let iteration = self.iterations + 1;

        if iteration % steps as u64 != 0 {
            self.accumulate(grads, params);
            self.iterations = iteration;

            let pending = self.pending();
            debug!(step = iteration, pending = pending; "accumulated gradients");
            return Ok(StepOutcome::Accumulated { pending });
        }

        let mut combined = self.combine(grads, params);
        combined.scale(self.reduction.factor(steps));
        self.optimizer.lock().update_params(&combined, params)?;

        combined.fill(0.);
        self.buffers = combined;
        self.iterations = iteration;

        debug!(step = iteration, window = steps; "applied accumulated gradients");
        Ok(StepOutcome::Flushed)
    }

    /// Drops the partially accumulated window, leaving the accumulator as if it were new.
    pub fn reset(&mut self) {
        debug!(discarded = self.pending(); "resetting gradient accumulator");
        self.buffers = NamedTensors::new();
        self.iterations = 0;
    }

    /// Captures the accumulation state so it can be persisted.
    pub fn snapshot(&self) -> AccumulatorState {
        AccumulatorState {
            accum_steps: self.accum_steps.get(),
            iterations: self.iterations,
            buffers: self.buffers.clone(),
        }
    }

    /// Restores a previously captured accumulation state.
    ///
    /// # Arguments
    /// * `state` - A snapshot taken with the same window size.
    ///
    /// # Returns
    /// A `SnapshotMismatch` error if the snapshot was taken with a different window size.
    pub fn restore(&mut self, state: AccumulatorState) -> Result<()> {
        if state.accum_steps != self.accum_steps.get() {
            return Err(AccumErr::SnapshotMismatch {
                reason: format!(
                    "it was taken with accum_steps={} but this accumulator uses accum_steps={}",
                    state.accum_steps, self.accum_steps
                ),
            });
        }

        self.buffers = state.buffers;
        self.iterations = state.iterations;
        Ok(())
    }

    /// Checks every precondition of `step` so that it can mutate without failing halfway.
    fn validate(&self, grads: &Gradients, params: &ParameterSet) -> Result<()> {
        if let Some(name) = grads.names().find(|name| !params.contains(name)) {
            return Err(AccumErr::UnknownParameter {
                param: name.to_string(),
            });
        }

        if let Some(name) = self.buffers.names().find(|name| !params.contains(name)) {
            return Err(AccumErr::MissingParameter {
                param: name.to_string(),
                from: "parameters",
            });
        }

        for (name, param) in params {
            let buffer = self.buffers.get(name);

            if let Some(buffer) = buffer {
                ensure_same_shape(name, param, buffer)?;
            }

            match grads.get(name) {
                Some(grad) => ensure_same_shape(name, grad, buffer.unwrap_or(param))?,
                None if self.missing == MissingGradients::Zero => {}
                None => {
                    return Err(AccumErr::MissingParameter {
                        param: name.clone(),
                        from: "gradients",
                    });
                }
            }
        }

        Ok(())
    }

    /// Adds `grads` into the buffers, creating the missing ones.
    fn accumulate(&mut self, grads: &Gradients, params: &ParameterSet) {
        for (name, param) in params {
            let buffer = self
                .buffers
                .as_map_mut()
                .entry(name.clone())
                .or_insert_with(|| Tensor::zeros(param.raw_dim()));

            if let Some(grad) = grads.get(name) {
                *buffer += grad;
            }
        }
    }

    /// Returns the buffers plus `grads` without modifying the buffers.
    fn combine(&self, grads: &Gradients, params: &ParameterSet) -> Gradients {
        params
            .iter()
            .map(|(name, param)| {
                let mut total = self
                    .buffers
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| Tensor::zeros(param.raw_dim()));

                if let Some(grad) = grads.get(name) {
                    total += grad;
                }

                (name.clone(), total)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2};

    use super::*;
    use crate::optimization::{Adam, GradientDescent};

    struct CountingOptimizer {
        inner: GradientDescent,
        calls: usize,
    }

    impl Optimizer for CountingOptimizer {
        fn update_params(&mut self, grads: &Gradients, params: &mut ParameterSet) -> Result<()> {
            self.calls += 1;
            self.inner.update_params(grads, params)
        }

        fn learning_rate(&self) -> f32 {
            self.inner.learning_rate()
        }
    }

    struct FailingOptimizer;

    impl Optimizer for FailingOptimizer {
        fn update_params(&mut self, _grads: &Gradients, _params: &mut ParameterSet) -> Result<()> {
            Err(AccumErr::InvalidConfig {
                what: "optimizer",
                reason: "always fails".to_string(),
            })
        }

        fn learning_rate(&self) -> f32 {
            0.
        }
    }

    fn shared<O: Optimizer>(optimizer: O) -> Arc<Mutex<O>> {
        Arc::new(Mutex::new(optimizer))
    }

    fn scalar(x: f32) -> Tensor {
        arr1(&[x]).into_dyn()
    }

    fn params() -> ParameterSet {
        ParameterSet::new()
            .with("dense/bias", arr1(&[0.5, -0.5]).into_dyn())
            .with("dense/kernel", arr2(&[[1., 2.], [3., 4.], [5., 6.]]).into_dyn())
    }

    fn grads(k: f32) -> Gradients {
        Gradients::new()
            .with("dense/bias", arr1(&[k, -2. * k]).into_dyn())
            .with(
                "dense/kernel",
                arr2(&[[k, 0.1], [0.2 * k, -k], [1., k * k]]).into_dyn(),
            )
    }

    fn assert_close(a: &ParameterSet, b: &ParameterSet) {
        for ((na, ta), (nb, tb)) in a.iter().zip(b.iter()) {
            assert_eq!(na, nb);
            for (x, y) in ta.iter().zip(tb.iter()) {
                assert!((x - y).abs() < 1e-5, "{na}: {x} != {y}");
            }
        }
    }

    #[test]
    fn zero_accum_steps_is_a_configuration_error() {
        let err = GradientAccumulator::new(shared(GradientDescent::new(0.1)), 0).unwrap_err();
        assert!(matches!(err, AccumErr::InvalidConfig { what: "accum_steps", .. }));
    }

    #[test]
    fn scalar_window_of_two() {
        let lr = 0.1;
        let mut acc = GradientAccumulator::new(shared(GradientDescent::new(lr)), 2).unwrap();
        let mut params = ParameterSet::new().with("x", scalar(10.));

        let outcome = acc
            .step(&Gradients::new().with("x", scalar(1.)), &mut params)
            .unwrap();
        assert_eq!(outcome, StepOutcome::Accumulated { pending: 1 });
        assert_eq!(params.get("x").unwrap(), &scalar(10.));
        assert_eq!(acc.buffer("x").unwrap(), &scalar(1.));

        let outcome = acc
            .step(&Gradients::new().with("x", scalar(3.)), &mut params)
            .unwrap();
        assert_eq!(outcome, StepOutcome::Flushed);
        assert!((params.get("x").unwrap()[[0]] - (10. - lr * 4.)).abs() < 1e-6);
        assert_eq!(acc.buffer("x").unwrap(), &scalar(0.));
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn window_update_matches_a_single_call_on_the_summed_gradient() {
        const STEPS: usize = 4;

        let mut acc = GradientAccumulator::new(shared(GradientDescent::new(0.05)), STEPS).unwrap();
        let mut accumulated = params();

        let mut summed = params().zeros_like();
        for k in 1..=STEPS {
            let g = grads(k as f32);
            for (name, t) in summed.iter_mut() {
                *t += g.get(name).unwrap();
            }
            acc.step(&g, &mut accumulated).unwrap();
        }

        let mut reference = params();
        GradientDescent::new(0.05)
            .update_params(&summed, &mut reference)
            .unwrap();

        assert_close(&accumulated, &reference);
    }

    #[test]
    fn stateful_optimizers_advance_once_per_window() {
        const STEPS: usize = 3;
        const WINDOWS: usize = 2;

        let mut acc =
            GradientAccumulator::new(shared(Adam::new(0.01, 0.9, 0.999, 1e-8)), STEPS).unwrap();
        let mut reference_opt = Adam::new(0.01, 0.9, 0.999, 1e-8);

        let mut accumulated = params();
        let mut reference = params();

        for w in 0..WINDOWS {
            let mut summed = params().zeros_like();
            for s in 0..STEPS {
                let g = grads((w * STEPS + s) as f32 * 0.3);
                for (name, t) in summed.iter_mut() {
                    *t += g.get(name).unwrap();
                }
                acc.step(&g, &mut accumulated).unwrap();
            }
            reference_opt.update_params(&summed, &mut reference).unwrap();
        }

        assert_close(&accumulated, &reference);
    }

    #[test]
    fn params_are_bit_identical_between_flushes() {
        let mut acc = GradientAccumulator::new(shared(GradientDescent::new(1.)), 5).unwrap();
        let mut params = params();
        let before = params.clone();

        for k in 0..4 {
            let outcome = acc.step(&grads(k as f32 + 1.), &mut params).unwrap();
            assert_eq!(outcome, StepOutcome::Accumulated { pending: k + 1 });
            assert_eq!(params, before);
        }

        assert!(acc.step(&grads(5.), &mut params).unwrap().is_flush());
        assert_ne!(params, before);
    }

    #[test]
    fn flush_zeroes_every_buffer() {
        let mut acc = GradientAccumulator::new(shared(GradientDescent::new(0.1)), 3).unwrap();
        let mut params = params();

        for k in 0..3 {
            acc.step(&grads(k as f32 + 1.), &mut params).unwrap();
        }

        assert_eq!(acc.pending(), 0);
        assert_eq!(acc.iterations(), 3);
        assert_eq!(acc.buffers().len(), 2);
        assert!(acc.buffers().iter().all(|(_, t)| t.iter().all(|&x| x == 0.)));
    }

    #[test]
    fn reset_matches_a_fresh_accumulator() {
        let mut acc = GradientAccumulator::new(shared(GradientDescent::new(0.1)), 3).unwrap();
        let fresh = GradientAccumulator::new(shared(GradientDescent::new(0.1)), 3).unwrap();
        let mut params = params();

        acc.step(&grads(1.), &mut params).unwrap();
        acc.step(&grads(2.), &mut params).unwrap();
        acc.reset();

        assert_eq!(acc.snapshot(), fresh.snapshot());
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn restored_snapshot_reproduces_the_original_run() {
        const STEPS: usize = 3;

        let mut original = GradientAccumulator::new(shared(GradientDescent::new(0.1)), STEPS)
            .unwrap()
            .with_reduction(Reduction::Mean);
        let mut params = params();

        original.step(&grads(1.), &mut params).unwrap();
        original.step(&grads(2.), &mut params).unwrap();
        original.step(&grads(3.), &mut params).unwrap();
        original.step(&grads(4.), &mut params).unwrap();

        let json = serde_json::to_string(&original.snapshot()).unwrap();
        let state: AccumulatorState = serde_json::from_str(&json).unwrap();

        let mut restored = GradientAccumulator::new(shared(GradientDescent::new(0.1)), STEPS)
            .unwrap()
            .with_reduction(Reduction::Mean);
        restored.restore(state).unwrap();
        let mut restored_params = params.clone();

        for k in 5..12 {
            let g = grads(k as f32);
            let a = original.step(&g, &mut params).unwrap();
            let b = restored.step(&g, &mut restored_params).unwrap();
            assert_eq!(a, b);
            assert_eq!(params, restored_params);
        }

        assert_eq!(original.snapshot(), restored.snapshot());
    }

    #[test]
    fn restoring_a_snapshot_with_another_window_fails() {
        let small = GradientAccumulator::new(shared(GradientDescent::new(0.1)), 2).unwrap();
        let mut large = GradientAccumulator::new(shared(GradientDescent::new(0.1)), 4).unwrap();

        let err = large.restore(small.snapshot()).unwrap_err();
        assert!(matches!(err, AccumErr::SnapshotMismatch { .. }));
    }

    #[test]
    fn mean_reduction_divides_by_the_window() {
        let mut acc = GradientAccumulator::new(shared(GradientDescent::new(1.)), 2)
            .unwrap()
            .with_reduction(Reduction::Mean);
        let mut params = ParameterSet::new().with("x", scalar(0.));

        acc.step(&Gradients::new().with("x", scalar(1.)), &mut params)
            .unwrap();
        acc.step(&Gradients::new().with("x", scalar(3.)), &mut params)
            .unwrap();

        assert_eq!(params.get("x").unwrap(), &scalar(-2.));
    }

    #[test]
    fn missing_gradient_fails_by_default() {
        let mut acc = GradientAccumulator::new(shared(GradientDescent::new(0.1)), 2).unwrap();
        let mut params = params();
        let partial = Gradients::new().with("dense/bias", arr1(&[1., 1.]).into_dyn());

        let err = acc.step(&partial, &mut params).unwrap_err();

        assert_eq!(
            err,
            AccumErr::MissingParameter {
                param: "dense/kernel".into(),
                from: "gradients"
            }
        );
        assert_eq!(acc.iterations(), 0);
        assert!(acc.buffers().is_empty());
    }

    #[test]
    fn missing_gradient_counts_as_zero_when_allowed() {
        let mut acc = GradientAccumulator::new(shared(GradientDescent::new(1.)), 2)
            .unwrap()
            .with_missing_gradients(MissingGradients::Zero);
        let mut params = params();
        let partial = Gradients::new().with("dense/bias", arr1(&[1., 1.]).into_dyn());

        acc.step(&partial, &mut params).unwrap();
        acc.step(&partial, &mut params).unwrap();

        assert_eq!(params.get("dense/bias").unwrap(), &arr1(&[-1.5, -2.5]).into_dyn());
        assert_eq!(params.get("dense/kernel"), self::params().get("dense/kernel"));
    }

    #[test]
    fn shape_mismatch_leaves_the_state_untouched() {
        let mut acc = GradientAccumulator::new(shared(GradientDescent::new(0.1)), 3).unwrap();
        let mut params = params();
        acc.step(&grads(1.), &mut params).unwrap();
        let before = acc.snapshot();

        let bad = grads(1.).with("dense/bias", arr1(&[1., 2., 3.]).into_dyn());
        let err = acc.step(&bad, &mut params).unwrap_err();

        assert_eq!(
            err,
            AccumErr::ShapeMismatch {
                param: "dense/bias".into(),
                got: vec![3],
                expected: vec![2],
            }
        );
        assert_eq!(acc.snapshot(), before);
    }

    #[test]
    fn unknown_gradient_is_rejected() {
        let mut acc = GradientAccumulator::new(shared(GradientDescent::new(0.1)), 3).unwrap();
        let mut params = params();

        let err = acc
            .step(&grads(1.).with("other", scalar(1.)), &mut params)
            .unwrap_err();

        assert_eq!(err, AccumErr::UnknownParameter { param: "other".into() });
    }

    #[test]
    fn removed_parameter_is_reported() {
        let mut acc = GradientAccumulator::new(shared(GradientDescent::new(0.1)), 3).unwrap();
        let mut params = params();
        acc.step(&grads(1.), &mut params).unwrap();

        let mut only_bias = ParameterSet::new().with("dense/bias", arr1(&[0., 0.]).into_dyn());
        let grads = Gradients::new().with("dense/bias", arr1(&[1., 1.]).into_dyn());
        let err = acc.step(&grads, &mut only_bias).unwrap_err();

        assert_eq!(
            err,
            AccumErr::MissingParameter {
                param: "dense/kernel".into(),
                from: "parameters"
            }
        );
    }

    #[test]
    fn failed_flush_keeps_the_window_open() {
        let mut acc = GradientAccumulator::new(shared(FailingOptimizer), 2).unwrap();
        let mut params = ParameterSet::new().with("x", scalar(0.));
        let g = Gradients::new().with("x", scalar(1.));

        acc.step(&g, &mut params).unwrap();
        let before = acc.snapshot();

        assert!(acc.step(&g, &mut params).is_err());
        assert_eq!(acc.snapshot(), before);
        assert_eq!(acc.pending(), 1);
    }

    #[test]
    fn the_optimizer_is_shared_with_the_caller() {
        let optimizer = shared(CountingOptimizer {
            inner: GradientDescent::new(0.1),
            calls: 0,
        });
        let mut acc = GradientAccumulator::new(Arc::clone(&optimizer), 3).unwrap();
        let mut params = params();

        for k in 0..7 {
            acc.step(&grads(k as f32), &mut params).unwrap();
        }

        assert_eq!(optimizer.lock().calls, 2);
        assert!(Arc::ptr_eq(&optimizer, &acc.optimizer()));
    }
}
