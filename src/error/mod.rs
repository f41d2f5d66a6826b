use std::fmt::Display;
use thiserror::Error;

pub mod codes;

pub use codes::{describe_error_code, ErrorCode};

use crate::storage::RepositoryError;

/// Result type used across the analytics engine
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// The unified error type for the analytics engine
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        field: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Repository error: {message}")]
    Repository {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Scheduler error: {message}")]
    Scheduler {
        code: u16,
        message: String,
        cadence: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Event error: {message}")]
    Event {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl AnalyticsError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ErrorCode::CONFIG_GENERIC,
            message: message.into(),
            field: None,
            source: None,
        }
    }

    /// Create a configuration error with specific code and offending field
    pub fn config_with_code(code: u16, message: impl Into<String>, field: Option<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            field,
            source: None,
        }
    }

    /// Create a scheduler error for a cadence
    pub fn scheduler(code: u16, message: impl Into<String>, cadence: impl Into<String>) -> Self {
        Self::Scheduler {
            code,
            message: message.into(),
            cadence: Some(cadence.into()),
            source: None,
        }
    }

    /// Create an event error with specific code
    pub fn event(code: u16, message: impl Into<String>) -> Self {
        Self::Event {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Repository { source: src, .. }
            | Self::Scheduler { source: src, .. }
            | Self::Event { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Repository { message, .. }
            | Self::Scheduler { message, .. }
            | Self::Event { message, .. }
            | Self::Other { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Repository { code, .. }
            | Self::Scheduler { code, .. }
            | Self::Event { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    /// Transient failures are retried on the next cycle instead of surfaced
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::REPOSITORY_GENERIC
                | ErrorCode::REPOSITORY_IO_ERROR
                | ErrorCode::REPOSITORY_UNAVAILABLE
                | ErrorCode::REPOSITORY_TIMEOUT
        )
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Repository { .. } => 3,
            Self::Scheduler { .. } => 4,
            Self::Event { .. } => 5,
            Self::Other { .. } => 1,
        }
    }
}

impl From<RepositoryError> for AnalyticsError {
    fn from(err: RepositoryError) -> Self {
        let code = match &err {
            RepositoryError::Io(_) => ErrorCode::REPOSITORY_IO_ERROR,
            RepositoryError::Unavailable(_) => ErrorCode::REPOSITORY_UNAVAILABLE,
            RepositoryError::Timeout(_) => ErrorCode::REPOSITORY_TIMEOUT,
            RepositoryError::Serialization(_) => ErrorCode::REPOSITORY_SERIALIZATION_ERROR,
            _ => ErrorCode::REPOSITORY_GENERIC,
        };
        Self::Repository {
            code,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for AnalyticsError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::config_with_code(ErrorCode::CONFIG_INVALID_YAML, err.to_string(), None)
            .with_source(err)
    }
}
