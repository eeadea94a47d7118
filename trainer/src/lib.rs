mod checkpoint;
mod config;
mod dataset;
mod error;
pub mod model;
mod trainer;

pub use checkpoint::Checkpoint;
pub use config::{FromOptimizerConfig, OptimizerConfig, TrainingConfig};
pub use dataset::Dataset;
pub use error::{Result, TrainErr};
pub use trainer::{EpochStats, Trainer};
