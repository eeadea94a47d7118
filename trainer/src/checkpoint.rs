use std::{fs, path::Path};

use accumulator::{AccumulatorState, ParameterSet};
use log::info;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Result;

/// Everything a training session needs to be resumed, including a half-filled accumulation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<O> {
    pub params: ParameterSet,
    pub optimizer: O,
    pub accumulator: AccumulatorState,
    /// The amount of epochs run before the checkpoint was taken.
    #[serde(default)]
    pub epoch: usize,
    /// The seed the epoch shuffles derive from.
    pub seed: u64,
}

impl<O: Serialize + DeserializeOwned> Checkpoint<O> {
    /// Writes the checkpoint as JSON, replacing whatever was at `path`.
    ///
    /// The file is written next to its destination first and then renamed over it, so a crash
    /// never leaves a truncated checkpoint behind.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");

        fs::write(&tmp, serde_json::to_vec(self)?)?;
        fs::rename(&tmp, path)?;

        info!(
            params = self.params.nparams(),
            step = self.accumulator.iterations;
            "saved checkpoint to {}", path.display()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let checkpoint: Self = serde_json::from_slice(&fs::read(path)?)?;

        info!(
            params = checkpoint.params.nparams(),
            step = checkpoint.accumulator.iterations;
            "loaded checkpoint from {}", path.display()
        );
        Ok(checkpoint)
    }
}
