//! Error types shared by every component of the local-search core.

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Unsupported variant, policy or hyper-parameter combination.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Batch, node or feature dimensions disagree between inputs.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Every candidate of a categorical choice was masked out.
    #[error("infeasible step: {0}")]
    InfeasibleStep(String),
    /// The successor array is not a single cycle over all nodes.
    #[error("invalid tour: {0}")]
    InvalidTour(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        Self::ShapeMismatch(message.into())
    }

    pub fn infeasible_step(message: impl Into<String>) -> Self {
        Self::InfeasibleStep(message.into())
    }

    pub fn invalid_tour(message: impl Into<String>) -> Self {
        Self::InvalidTour(message.into())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::ShapeMismatch(err.to_string())
    }
}

/// Fails with a shape mismatch unless `actual == expected`.
pub(crate) fn ensure_dim(what: &str, actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::shape_mismatch(format!(
            "{what}: expected {expected}, got {actual}"
        )))
    }
}
