//! # Error Handling
//!
//! Application-level error type used where component errors meet the outer
//! driver: configuration, persisted records, and anything that should end up
//! as one readable line in the log.
//!
//! Component errors (`CodecError`, `CaptureError`, `VoiceError`) stay typed
//! in their own modules and are converted here only when they cross into
//! application code.
//!
//! ## Key Rust Concepts for Error Handling:
//! - **Result<T, E>**: failures are values the caller has to look at
//! - **From trait**: lets `?` convert library errors into `AppError`
//! - **Display trait**: the human-readable message for each variant

use std::fmt;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: unexpected failures bubbling up from libraries
/// - **NotFound**: a referenced record does not exist
/// - **ConfigError**: configuration file or environment problems
/// - **ValidationError**: input rejected by a domain rule
/// - **StorageError**: persisted records could not be read or written
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    NotFound(String),
    ConfigError(String),
    ValidationError(String),
    StorageError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::StorageError(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Stable machine-readable label, used in status reports.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::NotFound(_) => "not_found",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
            AppError::StorageError(_) => "storage_error",
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

/// Persisted records that fail to parse are a storage problem, not a
/// caller mistake.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::StorageError(format!("JSON error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::StorageError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_kind() {
        let err = AppError::NotFound("medication med_x".to_string());
        assert_eq!(err.to_string(), "Not found: medication med_x");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_conversions() {
        let err: AppError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, AppError::StorageError(_)));

        let err: AppError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into();
        assert_eq!(err.kind(), "storage_error");

        let err: AppError = anyhow::anyhow!("boom").context("loading").into();
        assert_eq!(err.to_string(), "Internal error: loading: boom");
    }
}
