//! Error types for the velsweep-ml crate.

use thiserror::Error;

/// Top-level error type for sweep and training operations.
#[derive(Debug, Error)]
pub enum MlError {
    /// A hyperparameter names a variant no constructor map knows about.
    #[error("Unrecognized {parameter} '{value}'")]
    UnrecognizedName { parameter: String, value: String },

    #[error("Missing hyperparameter: {0}")]
    MissingParameter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Data(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Tracking error: {0}")]
    Tracking(#[from] velsweep_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MlError {
    pub fn unrecognized(parameter: impl Into<String>, value: impl Into<String>) -> Self {
        Self::UnrecognizedName {
            parameter: parameter.into(),
            value: value.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, MlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_display() {
        let err = MlError::unrecognized("activation_fn", "GELU");
        assert_eq!(err.to_string(), "Unrecognized activation_fn 'GELU'");
    }

    #[test]
    fn test_core_error_converts() {
        let err: MlError = velsweep_core::CoreError::tracking("no active run").into();
        assert!(matches!(err, MlError::Tracking(_)));
    }
}
