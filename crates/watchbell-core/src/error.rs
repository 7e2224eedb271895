//! Unified error types for Watchbell.

use thiserror::Error;

/// Result type alias using WatchbellError.
pub type Result<T> = std::result::Result<T, WatchbellError>;

#[derive(Error, Debug)]
pub enum WatchbellError {
    // Item errors
    #[error("Invalid item state: {0}")]
    InvalidState(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // Reminder pipeline errors
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Directory lookup failed: {0}")]
    Directory(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl WatchbellError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error should count against an item's failure budget.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            Self::NotFound(_) | Self::PermissionDenied(_) | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WatchbellError::Delivery("webhook timeout".into());
        assert!(err.to_string().contains("webhook timeout"));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(
            WatchbellError::invalid("x"),
            WatchbellError::InvalidState(_)
        ));
        assert!(matches!(
            WatchbellError::delivery("x"),
            WatchbellError::Delivery(_)
        ));
        assert!(matches!(
            WatchbellError::persistence("x"),
            WatchbellError::Persistence(_)
        ));
        assert!(matches!(
            WatchbellError::config("x"),
            WatchbellError::Config(_)
        ));
    }

    #[test]
    fn test_failure_classification() {
        assert!(WatchbellError::delivery("x").counts_as_failure());
        assert!(WatchbellError::persistence("x").counts_as_failure());
        assert!(!WatchbellError::NotFound("x".into()).counts_as_failure());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WatchbellError = io_err.into();
        assert!(matches!(err, WatchbellError::Io(_)));
    }
}
