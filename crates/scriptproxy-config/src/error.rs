//! Configuration error types

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// The file content is not valid for its format
    #[error("Failed to parse {format}: {message}")]
    Parse {
        /// Format name
        format: &'static str,
        /// Parser message
        message: String,
    },

    /// An environment variable reference could not be resolved
    #[error("Environment variable '{0}' not set and no default provided")]
    Env(String),

    /// A value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The file extension is not a known format
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
}

impl ConfigError {
    /// Create a validation error
    pub fn invalid(msg: impl std::fmt::Display) -> Self {
        Self::Invalid(msg.to_string())
    }

    pub(crate) fn parse(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            format,
            message: err.to_string(),
        }
    }
}
