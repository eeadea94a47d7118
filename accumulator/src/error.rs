use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire accumulator module.
pub type Result<T> = std::result::Result<T, AccumErr>;

/// The accumulator module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum AccumErr {
    InvalidConfig {
        what: &'static str,
        reason: String,
    },
    ShapeMismatch {
        param: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    MissingParameter {
        param: String,
        from: &'static str,
    },
    UnknownParameter {
        param: String,
    },
    SnapshotMismatch {
        reason: String,
    },
}

impl Display for AccumErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccumErr::InvalidConfig { what, reason } => {
                format!("Invalid configuration for {what}: {reason}")
            }
            AccumErr::ShapeMismatch {
                param,
                got,
                expected,
            } => format!(
                "There's a shape mismatch for parameter '{param}', got {got:?} and expected {expected:?}"
            ),
            AccumErr::MissingParameter { param, from } => {
                format!("The parameter '{param}' is missing from the {from}")
            }
            AccumErr::UnknownParameter { param } => {
                format!("Received a gradient for '{param}', which is not a known parameter")
            }
            AccumErr::SnapshotMismatch { reason } => {
                format!("Failed to restore the accumulator state: {reason}")
            }
        };

        write!(f, "{s}")
    }
}

impl Error for AccumErr {}
