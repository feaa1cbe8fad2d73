use thiserror::Error;

/// Canonical error type for core harness operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Scenario or configuration failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Request template could not be rendered.
    #[error("template error: {message}")]
    Template {
        /// Human-readable explanation of the template problem.
        message: String,
    },

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },
}

impl CoreError {
    /// Creates a `ValidationError` variant.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// Creates a `Template` variant.
    #[must_use]
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
