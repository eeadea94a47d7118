mod all_reduce;
mod cross_replica;
mod local;

pub use all_reduce::AllReduce;
pub use cross_replica::CrossReplica;
pub use local::LocalReduce;
