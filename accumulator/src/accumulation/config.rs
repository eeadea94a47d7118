use serde::{Deserialize, Serialize};

/// How a set of gradients gets combined into the one that is finally applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// The combined gradient is the plain sum of its parts.
    #[default]
    Sum,
    /// The combined gradient is the sum divided by the amount of parts.
    Mean,
}

impl Reduction {
    /// Returns the factor the sum of `n` gradients has to be multiplied by.
    pub fn factor(self, n: usize) -> f32 {
        match self {
            Reduction::Sum => 1.,
            Reduction::Mean => 1. / n as f32,
        }
    }
}

/// What to do with a parameter that didn't get a gradient in a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingGradients {
    /// Fail the step with a `MissingParameter` error.
    #[default]
    Error,
    /// Treat the missing gradient as a zero contribution.
    Zero,
}
