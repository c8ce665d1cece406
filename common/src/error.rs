//! Error types for RateSync.

use thiserror::Error;

/// Main error type for RateSync operations.
#[derive(Error, Debug)]
pub enum RateSyncError {
    /// Request rejected before any I/O (bad window, malformed code).
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Requested entity has no stored data at all.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream observation provider failed.
    #[error("Provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    /// Unique-constraint violation from a concurrent duplicate insert.
    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    /// Series still referenced by stored rate points.
    #[error("Series in use: {0}")]
    SeriesInUse(String),

    /// Any other storage failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RateSyncError {
    /// Create a validation error without a field.
    pub fn validation(message: impl Into<String>) -> Self {
        RateSyncError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        RateSyncError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RateSyncError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a unique-constraint conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RateSyncError::PersistenceConflict(_))
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RateSyncError::Provider { .. }
                | RateSyncError::PersistenceConflict(_)
                | RateSyncError::Database(_)
        )
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            RateSyncError::Validation { .. } => "VALIDATION_ERROR",
            RateSyncError::NotFound(_) => "NOT_FOUND",
            RateSyncError::Provider { .. } => "PROVIDER_ERROR",
            RateSyncError::PersistenceConflict(_) => "PERSISTENCE_CONFLICT",
            RateSyncError::SeriesInUse(_) => "SERIES_IN_USE",
            RateSyncError::Database(_) => "DATABASE_ERROR",
            RateSyncError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<sqlx::Error> for RateSyncError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                RateSyncError::PersistenceConflict(db_err.message().to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                RateSyncError::SeriesInUse(db_err.message().to_string())
            }
            _ => RateSyncError::Database(err.to_string()),
        }
    }
}

/// Result type alias for RateSync operations.
pub type Result<T> = std::result::Result<T, RateSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RateSyncError::provider("ecb", "timeout").is_retryable());
        assert!(RateSyncError::PersistenceConflict("dup".into()).is_retryable());
        assert!(!RateSyncError::validation("start after end").is_retryable());
        assert!(!RateSyncError::NotFound("EUR".into()).is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RateSyncError::invalid_field("currency", "bad").error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            RateSyncError::SeriesInUse("EUR".into()).error_code(),
            "SERIES_IN_USE"
        );
    }

    #[test]
    fn test_row_not_found_maps_to_database() {
        let err: RateSyncError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, RateSyncError::Database(_)));
    }
}
