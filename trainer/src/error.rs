use std::{error::Error, fmt, io};

use accumulator::AccumErr;
use ndarray::ShapeError;
use rand_distr::{NormalError, uniform::Error as UniformError};
use strategy::StrategyErr;

/// The trainer module's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Training runtime failures.
#[derive(Debug)]
pub enum TrainErr {
    Accum(AccumErr),
    Strategy(StrategyErr),
    Io(io::Error),
    Json(serde_json::Error),
    Shape(ShapeError),
    Init(String),
    InvalidConfig {
        what: &'static str,
        reason: String,
    },
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    ReplicaDivergence {
        replica: usize,
    },
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Accum(e) => write!(f, "accumulator error: {e}"),
            TrainErr::Strategy(e) => write!(f, "strategy error: {e}"),
            TrainErr::Io(e) => write!(f, "io error: {e}"),
            TrainErr::Json(e) => write!(f, "json error: {e}"),
            TrainErr::Shape(e) => write!(f, "shape error: {e}"),
            TrainErr::Init(e) => write!(f, "failed to initialize the parameters: {e}"),
            TrainErr::InvalidConfig { what, reason } => {
                write!(f, "invalid configuration for {what}: {reason}")
            }
            TrainErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => write!(
                f,
                "size mismatch between {a} and {b}: got {got}, expected {expected}"
            ),
            TrainErr::ReplicaDivergence { replica } => write!(
                f,
                "replica {replica} finished training with parameters that differ from replica 0"
            ),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Accum(e) => Some(e),
            TrainErr::Strategy(e) => Some(e),
            TrainErr::Io(e) => Some(e),
            TrainErr::Json(e) => Some(e),
            TrainErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AccumErr> for TrainErr {
    fn from(value: AccumErr) -> Self {
        Self::Accum(value)
    }
}

impl From<StrategyErr> for TrainErr {
    fn from(value: StrategyErr) -> Self {
        match value {
            StrategyErr::Accum(e) => Self::Accum(e),
            e => Self::Strategy(e),
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for TrainErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<ShapeError> for TrainErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<UniformError> for TrainErr {
    fn from(value: UniformError) -> Self {
        Self::Init(value.to_string())
    }
}

impl From<NormalError> for TrainErr {
    fn from(value: NormalError) -> Self {
        Self::Init(value.to_string())
    }
}

/// Boundary conversion for the binary.
impl From<TrainErr> for io::Error {
    fn from(value: TrainErr) -> Self {
        match value {
            TrainErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
