mod error;
mod mirrored;
mod reduction;

pub use error::{Result, StrategyErr};
pub use mirrored::{MirroredStrategy, ReplicaContext};
pub use reduction::{AllReduce, CrossReplica, LocalReduce};
