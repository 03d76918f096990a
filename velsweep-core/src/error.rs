//! Error types for velsweep core.
//!
//! Uses `thiserror` for structured variants covering configuration,
//! tracking, and persistence failures.

/// Top-level error type for the core library.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tracking error: {message}")]
    Tracking { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Hyperparameter '{name}' has no candidate values")]
    EmptyParameter { name: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl CoreError {
    pub fn tracking(message: impl Into<String>) -> Self {
        Self::Tracking {
            message: message.into(),
        }
    }
}

/// Convenience alias used across the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;
