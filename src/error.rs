//! Unified error hierarchy for the pacing model
//!
//! Calibration failures are mostly absorbed inside the engine (a cycle is
//! skipped, a candidate scores infinite loss), but they are still typed so
//! that callers and logs can tell them apart.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all pacing-model operations
#[derive(Debug, Error)]
pub enum PacingError {
    /// Calibration and fitting errors
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// Sample source errors
    #[error("Sample source error: {0}")]
    Source(#[from] SourceError),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decoding errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while building training sets or scoring candidates
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    /// Not enough samples to do anything meaningful
    #[error("Insufficient data for {stage}: {reason}")]
    InsufficientData { stage: String, reason: String },

    /// Candidate parameters violate hr_low < hr_high or have non-positive factors
    #[error("Degenerate parameters: {reason}")]
    DegenerateFit { reason: String },

    /// No validated sample had a simulated point within tolerance
    #[error("No validated sample matched a simulated point in cycle {label}")]
    NoMatch { label: String },
}

/// Errors reported by a sample source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Backing store could not be read
    #[error("Source unavailable: {reason}")]
    Unavailable { reason: String },

    /// A record could not be decoded
    #[error("Parse error in {path} at record {record}: {reason}")]
    ParseError {
        path: PathBuf,
        record: usize,
        reason: String,
    },

    /// Requested range is inverted
    #[error("Invalid range: {start} is after {end}")]
    InvalidRange { start: String, end: String },
}

/// Result type alias for pacing-model operations
pub type Result<T> = std::result::Result<T, PacingError>;

impl PacingError {
    /// Check if a later retry may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PacingError::Source(SourceError::Unavailable { .. }) | PacingError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PacingError::Calibration(CalibrationError::InsufficientData { .. }) => {
                ErrorSeverity::Info
            }
            PacingError::Calibration(_) => ErrorSeverity::Warning,
            PacingError::Validation(_) => ErrorSeverity::Warning,
            PacingError::Source(SourceError::Unavailable { .. }) => ErrorSeverity::Warning,
            PacingError::Source(_) => ErrorSeverity::Error,
            PacingError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PacingError::Calibration(CalibrationError::InsufficientData { stage, .. }) => {
                format!(
                    "Not enough data for {}. Keep recording heart rate and rating your energy.",
                    stage
                )
            }
            PacingError::Source(SourceError::ParseError { path, record, .. }) => {
                format!("Could not read record {} of {}", record, path.display())
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = PacingError::Calibration(CalibrationError::InsufficientData {
            stage: "training".to_string(),
            reason: "no heart rate".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Info);
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::INFO);

        let err = PacingError::Calibration(CalibrationError::NoMatch {
            label: "2024-03-01".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = PacingError::Internal("test".to_string());
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_error_retryable() {
        let err = PacingError::Source(SourceError::Unavailable {
            reason: "locked".to_string(),
        });
        assert!(err.is_retryable());

        let err = PacingError::Validation("test".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_user_messages() {
        let err = PacingError::Calibration(CalibrationError::InsufficientData {
            stage: "sleep detection".to_string(),
            reason: "1 sample".to_string(),
        });
        assert!(err.user_message().contains("Not enough data"));

        let err = PacingError::Source(SourceError::ParseError {
            path: PathBuf::from("hr.csv"),
            record: 3,
            reason: "bad bpm".to_string(),
        });
        assert!(err.user_message().contains("record 3"));
    }
}
