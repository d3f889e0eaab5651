//! Error types for alert governance

use thiserror::Error;

/// Errors surfaced by fallible (non fail-soft) entry points
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Invalid alert settings: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Raised by the strict settings path when normalization had to repair input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", errors.join("; "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

impl ValidationError {
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }
}

/// Failures reported by a key-value store adapter
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_joins_messages() {
        let err = ValidationError::new(vec![
            "quiet_hours.start: invalid time '25:00'".to_string(),
            "daily_caps.low: negative cap -1".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "quiet_hours.start: invalid time '25:00'; daily_caps.low: negative cap -1"
        );

        let wrapped: GovernanceError = err.into();
        assert!(wrapped.to_string().starts_with("Invalid alert settings:"));
    }
}
