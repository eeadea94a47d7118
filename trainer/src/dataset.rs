use std::num::NonZeroUsize;

use log::warn;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, s};
use rand::{Rng, seq::SliceRandom};
use rand_distr::{Distribution, Normal, Uniform};

use crate::{Result, TrainErr};

/// An in-memory supervised dataset, one sample per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Array2<f32>,
    y: Array2<f32>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `x` - The inputs, one sample per row.
    /// * `y` - The expected outputs, one sample per row.
    ///
    /// # Returns
    /// A new `Dataset` or a `SizeMismatch` error if `x` and `y` don't have the same amount of rows.
    pub fn new(x: Array2<f32>, y: Array2<f32>) -> Result<Self> {
        if x.nrows() != y.nrows() {
            return Err(TrainErr::SizeMismatch {
                a: "y",
                b: "x",
                got: y.nrows(),
                expected: x.nrows(),
            });
        }

        Ok(Self { x, y })
    }

    /// Generates a noisy linear regression problem, `y = x · weights + bias + noise`.
    ///
    /// # Arguments
    /// * `rng` - The random number generator to sample from.
    /// * `samples` - The amount of rows to generate.
    /// * `weights` - The `[inputs, outputs]` matrix of the underlying linear map.
    /// * `bias` - The `[outputs]` offset of the underlying linear map.
    /// * `noise` - The standard deviation of the gaussian noise added to every output.
    ///
    /// # Returns
    /// The generated dataset or an error if the arguments can't describe a linear map.
    pub fn linear<R: Rng + ?Sized>(
        rng: &mut R,
        samples: usize,
        weights: ArrayView2<f32>,
        bias: ArrayView1<f32>,
        noise: f32,
    ) -> Result<Self> {
        if weights.ncols() != bias.len() {
            return Err(TrainErr::SizeMismatch {
                a: "bias",
                b: "weights",
                got: bias.len(),
                expected: weights.ncols(),
            });
        }

        let inputs = Uniform::<f32>::new_inclusive(-1., 1.)?;
        let noise = Normal::<f32>::new(0., noise)?;

        let x = Array2::from_shape_fn((samples, weights.nrows()), |_| inputs.sample(&mut *rng));
        let mut y = x.dot(&weights) + &bias;
        y.mapv_inplace(|v| v + noise.sample(&mut *rng));

        Self::new(x, y)
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn inputs(&self) -> usize {
        self.x.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.y.ncols()
    }

    pub fn x(&self) -> ArrayView2<'_, f32> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView2<'_, f32> {
        self.y.view()
    }

    /// Shuffles the rows of the dataset, keeping every input next to its output.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut rows: Vec<usize> = (0..self.len()).collect();
        rows.shuffle(rng);

        self.x = self.x.select(Axis(0), &rows);
        self.y = self.y.select(Axis(0), &rows);
    }

    /// Iterates the dataset in mini-batches, the last one may be smaller.
    pub fn batches(
        &self,
        batch_size: NonZeroUsize,
    ) -> impl Iterator<Item = (ArrayView2<'_, f32>, ArrayView2<'_, f32>)> {
        let n = batch_size.get();
        self.x
            .axis_chunks_iter(Axis(0), n)
            .zip(self.y.axis_chunks_iter(Axis(0), n))
    }

    /// Splits the dataset into `n` contiguous shards of the same length.
    ///
    /// Replicas must run the same amount of steps to stay in lockstep, so the rows that don't
    /// fit evenly are dropped.
    ///
    /// # Returns
    /// The shards or an `InvalidConfig` error if there are fewer rows than shards.
    pub fn shard(&self, n: NonZeroUsize) -> Result<Vec<Dataset>> {
        let n = n.get();
        let size = self.len() / n;
        if size == 0 {
            return Err(TrainErr::InvalidConfig {
                what: "replicas",
                reason: format!("can't split {} samples into {n} shards", self.len()),
            });
        }

        let remainder = self.len() % n;
        if remainder > 0 {
            warn!(dropped = remainder, shards = n; "dataset doesn't split evenly");
        }

        Ok((0..n)
            .map(|i| {
                let (start, end) = (i * size, (i + 1) * size);
                Self {
                    x: self.x.slice(s![start..end, ..]).to_owned(),
                    y: self.y.slice(s![start..end, ..]).to_owned(),
                }
            })
            .collect())
    }
}
