//! Result and error types for Regress.

use thiserror::Error;

/// Result type for Regress operations
pub type RegressResult<T> = Result<T, RegressError>;

/// Errors that can occur in Regress
#[derive(Debug, Error)]
pub enum RegressError {
    /// A required file or directory could not be located
    #[error("Not found: {what}")]
    NotFound {
        /// Description of what was searched for
        what: String,
    },

    /// External executable is missing
    #[error("Tool not found: {tool}")]
    ToolNotFound {
        /// Executable that could not be started
        tool: String,
    },

    /// External executable ran but reported an error
    #[error("{tool} failed: {message}")]
    ToolFailed {
        /// Executable name
        tool: String,
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("{what} timed out after {seconds}s")]
    Timeout {
        /// What was being waited for
        what: String,
        /// Timeout in seconds
        seconds: u64,
    },

    /// Image comparison error
    #[error("Image comparison failed: {message}")]
    ImageComparison {
        /// Error message
        message: String,
    },

    /// Invalid argument or configuration value
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// History database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Image decoding or encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RegressError {
    /// Create a not-found error
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a tool-not-found error
    #[must_use]
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create a tool failure error
    #[must_use]
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Whether this error should abort the whole invocation
    #[must_use]
    pub const fn is_environment_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::ToolNotFound { .. } | Self::Timeout { .. }
        )
    }
}
