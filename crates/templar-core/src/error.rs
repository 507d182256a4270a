//! Error types for Templar

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flat classification of every failure the engine can report.
///
/// Outcomes and front ends carry an `ErrorKind` plus a message instead of the
/// full error, so the kind must be cheap to copy and serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    SourceUnavailable,
    UnboundPlaceholder,
    TypeConversion,
    UnsupportedType,
    ArityMismatch,
    PoolExhausted,
    ProcedureFailed,
    Cancelled,
    Aborted,
    InvalidTemplate,
    Backend,
    Configuration,
    NotSupported,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::SourceUnavailable => "SourceUnavailable",
            Self::UnboundPlaceholder => "UnboundPlaceholder",
            Self::TypeConversion => "TypeConversion",
            Self::UnsupportedType => "UnsupportedType",
            Self::ArityMismatch => "ArityMismatch",
            Self::PoolExhausted => "PoolExhausted",
            Self::ProcedureFailed => "ProcedureFailed",
            Self::Cancelled => "Cancelled",
            Self::Aborted => "Aborted",
            Self::InvalidTemplate => "InvalidTemplate",
            Self::Backend => "Backend",
            Self::Configuration => "Configuration",
            Self::NotSupported => "NotSupported",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for Templar operations
#[derive(Error, Debug)]
pub enum TemplarError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Template source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Unbound placeholder: {0}")]
    UnboundPlaceholder(String),

    #[error("Type conversion failed: {0}")]
    TypeConversion(String),

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Arity mismatch: expected {expected}, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Procedure failed: {0}")]
    ProcedureFailed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TemplarError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            Self::UnboundPlaceholder(_) => ErrorKind::UnboundPlaceholder,
            Self::TypeConversion(_) => ErrorKind::TypeConversion,
            Self::UnsupportedType(_) => ErrorKind::UnsupportedType,
            Self::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            Self::PoolExhausted(_) => ErrorKind::PoolExhausted,
            Self::ProcedureFailed(_) => ErrorKind::ProcedureFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Aborted(_) => ErrorKind::Aborted,
            Self::InvalidTemplate(_) => ErrorKind::InvalidTemplate,
            Self::Connection(_) | Self::Query(_) | Self::Io(_) => ErrorKind::Backend,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::NotSupported(_) => ErrorKind::NotSupported,
        }
    }

    /// True for errors raised before any backend I/O took place
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound
                | ErrorKind::UnboundPlaceholder
                | ErrorKind::TypeConversion
                | ErrorKind::UnsupportedType
                | ErrorKind::ArityMismatch
                | ErrorKind::InvalidTemplate
        )
    }
}

/// Result type alias for Templar operations
pub type Result<T> = std::result::Result<T, TemplarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(TemplarError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(TemplarError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            TemplarError::ArityMismatch { expected: 2, actual: 3 }.kind(),
            ErrorKind::ArityMismatch
        );
        assert_eq!(TemplarError::Query("boom".into()).kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_error_display() {
        let err = TemplarError::ArityMismatch { expected: 2, actual: 3 };
        assert_eq!(err.to_string(), "Arity mismatch: expected 2, got 3");
        assert_eq!(TemplarError::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn test_validation_errors() {
        assert!(TemplarError::UnboundPlaceholder(":id".into()).is_validation());
        assert!(!TemplarError::PoolExhausted("timeout".into()).is_validation());
        assert!(!TemplarError::ProcedureFailed("ORA-1".into()).is_validation());
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::PoolExhausted).unwrap();
        assert_eq!(json, "\"PoolExhausted\"");
    }
}
