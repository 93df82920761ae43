use thiserror::Error;

use crate::job::ResultId;

/// Main error type for the Tunelab client
#[derive(Error, Debug)]
pub enum TlError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Experiment not found: {name}")]
    ExperimentNotFound { name: String },

    #[error("Invalid job: {message}")]
    InvalidJob { message: String },

    #[error("No completed jobs: every job is still unreported or infeasible")]
    NoCompletedJobs,

    #[error("Suggestion {result_id} was not filled in after {waited_ms} ms")]
    SuggestionTimeout { result_id: ResultId, waited_ms: u64 },

    #[error("Waiting for suggestion {result_id} was cancelled")]
    SuggestionCancelled { result_id: ResultId },

    #[error("Synchronization failed: {message}")]
    Sync { message: String },

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TlError {
    /// True for the "resume lookup came up empty" case callers fall back on.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TlError::ExperimentNotFound { .. })
    }
}

/// Errors surfaced by the remote experiment store.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP request failed: {message}")]
    Http { message: String },

    #[error("Remote returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Remote resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Remote conflict: {message}")]
    Conflict { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },
}

/// Result type alias for Tunelab operations
pub type TlResult<T> = Result<T, TlError>;

/// Result alias for remote store operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::TlError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::TlError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TlError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = TlError::SuggestionTimeout {
            result_id: 17,
            waited_ms: 4000,
        };

        assert!(error.to_string().contains("17"));
        assert!(error.to_string().contains("4000"));
    }

    #[test]
    fn test_error_conversion() {
        let remote = RemoteError::Conflict {
            message: "experiment exists".to_string(),
        };
        let error: TlError = remote.into();

        match error {
            TlError::Remote(RemoteError::Conflict { .. }) => (),
            _ => panic!("Expected Remote conflict error"),
        }
    }

    #[test]
    fn test_not_found_classification() {
        let missing = TlError::ExperimentNotFound {
            name: "demo".to_string(),
        };
        assert!(missing.is_not_found());
        assert!(!TlError::NoCompletedJobs.is_not_found());
    }

    #[test]
    fn test_macros() {
        let validation = validation_error!("min {} must be below max {}", 2, 1);
        assert!(matches!(validation, TlError::Validation(_)));
        let _internal_err = internal_error!("Something went wrong");
        let _config_err = config_error!("Missing required key: {}", "access_token");
    }
}
