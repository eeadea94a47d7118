use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use accumulator::{
    MissingGradients, Reduction,
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum},
};
use serde::{Deserialize, Serialize};

use crate::{Result, TrainErr};

/// The specification of the base optimizer wrapped by the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerConfig {
    GradientDescent {
        learning_rate: f32,
    },
    GradientDescentWithMomentum {
        learning_rate: f32,
        momentum: f32,
    },
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
}

impl OptimizerConfig {
    pub fn learning_rate(&self) -> f32 {
        match *self {
            OptimizerConfig::GradientDescent { learning_rate }
            | OptimizerConfig::GradientDescentWithMomentum { learning_rate, .. }
            | OptimizerConfig::Adam { learning_rate, .. } => learning_rate,
        }
    }

    /// Checks the hyperparameters of the optimizer.
    pub fn validate(&self) -> Result<()> {
        let lr = self.learning_rate();
        if !lr.is_finite() || lr <= 0. {
            return Err(TrainErr::InvalidConfig {
                what: "learning_rate",
                reason: format!("must be a positive number, got {lr}"),
            });
        }

        match *self {
            OptimizerConfig::GradientDescentWithMomentum { momentum, .. }
                if !(0. ..1.).contains(&momentum) =>
            {
                Err(TrainErr::InvalidConfig {
                    what: "momentum",
                    reason: format!("must be in [0, 1), got {momentum}"),
                })
            }
            OptimizerConfig::Adam { beta1, beta2, .. }
                if !((0. ..1.).contains(&beta1) && (0. ..1.).contains(&beta2)) =>
            {
                Err(TrainErr::InvalidConfig {
                    what: "betas",
                    reason: format!("must be in [0, 1), got {beta1} and {beta2}"),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Turns an `OptimizerConfig` into the optimizer it describes.
pub trait FromOptimizerConfig: Sized {
    /// # Returns
    /// The optimizer or an `InvalidConfig` error if `config` describes another kind of optimizer.
    fn from_config(config: &OptimizerConfig) -> Result<Self>;
}

fn wrong_optimizer(expected: &str, got: &OptimizerConfig) -> TrainErr {
    TrainErr::InvalidConfig {
        what: "optimizer",
        reason: format!("expected {expected}, got {got:?}"),
    }
}

impl FromOptimizerConfig for GradientDescent {
    fn from_config(config: &OptimizerConfig) -> Result<Self> {
        match *config {
            OptimizerConfig::GradientDescent { learning_rate } => Ok(Self::new(learning_rate)),
            _ => Err(wrong_optimizer("gradient_descent", config)),
        }
    }
}

impl FromOptimizerConfig for GradientDescentWithMomentum {
    fn from_config(config: &OptimizerConfig) -> Result<Self> {
        match *config {
            OptimizerConfig::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            } => Ok(Self::new(learning_rate, momentum)),
            _ => Err(wrong_optimizer("gradient_descent_with_momentum", config)),
        }
    }
}

impl FromOptimizerConfig for Adam {
    fn from_config(config: &OptimizerConfig) -> Result<Self> {
        match *config {
            OptimizerConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Ok(Self::new(learning_rate, beta1, beta2, epsilon)),
            _ => Err(wrong_optimizer("adam", config)),
        }
    }
}

/// Everything needed to run a training session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub replicas: NonZeroUsize,
    pub accum_steps: usize,
    pub epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub accumulation: Reduction,
    #[serde(default = "default_cross_replica")]
    pub cross_replica: Reduction,
    #[serde(default)]
    pub missing_gradients: MissingGradients,
    pub optimizer: OptimizerConfig,
    pub checkpoint: PathBuf,
}

fn default_cross_replica() -> Reduction {
    Reduction::Mean
}

const DEFAULT_REPLICAS: NonZeroUsize = NonZeroUsize::new(2).unwrap();
const DEFAULT_EPOCHS: NonZeroUsize = NonZeroUsize::new(3).unwrap();
const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(8).unwrap();

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            replicas: DEFAULT_REPLICAS,
            accum_steps: 10,
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            seed: Some(42),
            accumulation: Reduction::Sum,
            cross_replica: default_cross_replica(),
            missing_gradients: MissingGradients::Error,
            optimizer: OptimizerConfig::GradientDescent {
                learning_rate: 1e-2,
            },
            checkpoint: std::env::temp_dir().join("trainer-checkpoint.json"),
        }
    }
}

impl TrainingConfig {
    /// Parses a `TrainingConfig` from a JSON string and validates it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a `TrainingConfig` from a JSON file and validates it.
    ///
    /// # Errors
    /// An `Io` error if the file can't be read, a `Json` error if it doesn't describe a
    /// configuration and an `InvalidConfig` error if the values don't make sense.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Checks the values that serde alone can't, the optimizer included.
    pub fn validate(&self) -> Result<()> {
        self.validate_training()?;
        self.optimizer.validate()
    }

    /// Checks every value but `optimizer`.
    pub fn validate_training(&self) -> Result<()> {
        if self.accum_steps == 0 {
            return Err(TrainErr::InvalidConfig {
                what: "accum_steps",
                reason: "must be a positive integer, got 0".to_string(),
            });
        }

        Ok(())
    }
}
