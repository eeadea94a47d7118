use std::{
    error::Error,
    fmt::{self, Display},
};

use accumulator::AccumErr;

/// The result type used across the strategy crate.
pub type Result<T> = std::result::Result<T, StrategyErr>;

/// The strategy module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyErr {
    Accum(AccumErr),
    ReplicaFailed {
        replica: usize,
    },
    ShapeMismatch {
        param: String,
        replica: usize,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    InvalidConfig {
        what: &'static str,
        reason: String,
    },
    Join(String),
}

impl Display for StrategyErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyErr::Accum(e) => format!("Accumulator error: {e}"),
            StrategyErr::ReplicaFailed { replica } => {
                format!("Replica {replica} failed to contribute its gradients")
            }
            StrategyErr::ShapeMismatch {
                param,
                replica,
                got,
                expected,
            } => format!(
                "Replica {replica} sent a gradient for '{param}' of shape {got:?}, expected {expected:?}"
            ),
            StrategyErr::InvalidConfig { what, reason } => {
                format!("Invalid configuration for {what}: {reason}")
            }
            StrategyErr::Join(e) => format!("A replica task could not be joined: {e}"),
        };

        write!(f, "{s}")
    }
}

impl Error for StrategyErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StrategyErr::Accum(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AccumErr> for StrategyErr {
    fn from(value: AccumErr) -> Self {
        Self::Accum(value)
    }
}
