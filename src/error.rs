//! Error types for the Nutrimind pipeline
//!
//! Structured errors are defined with thiserror; anyhow is only used at the
//! binary edge and converted into [`PipelineError::Other`] when it crosses
//! back into the library.

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An upstream collaborator (event store, cluster table, subscriptions)
    /// could not be reached. Scheduled runs retry these.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller supplied something the pipeline cannot use
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Text generation failed. Never leaves the renderer boundary.
    #[error("Text generation error: {0}")]
    TextGeneration(String),

    /// Invalid identifier format
    #[error("Invalid id: {0}")]
    InvalidId(#[from] uuid::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Whether a scheduled run should retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::UpstreamUnavailable(_))
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<libsql::Error> for PipelineError {
    fn from(err: libsql::Error) -> Self {
        PipelineError::Database(err.to_string())
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

/// Convert anyhow::Error to PipelineError
impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::NotFound("pattern abc".to_string());
        assert_eq!(err.to_string(), "Not found: pattern abc");
    }

    #[test]
    fn test_error_conversion() {
        let uuid_err = uuid::Uuid::parse_str("invalid");
        assert!(uuid_err.is_err());

        let err: PipelineError = uuid_err.unwrap_err().into();
        assert!(matches!(err, PipelineError::InvalidId(_)));
    }

    #[test]
    fn test_only_upstream_errors_are_retryable() {
        assert!(PipelineError::UpstreamUnavailable("event store".into()).is_retryable());
        assert!(!PipelineError::NotFound("x".into()).is_retryable());
        assert!(!PipelineError::Database("locked".into()).is_retryable());
    }
}
