//! Error types for the demandmc library.

use thiserror::Error;

/// Result type alias for model-fitting operations.
pub type Result<T> = std::result::Result<T, DemandError>;

/// Errors that can occur while building data, models, or running inference.
///
/// Validation errors are raised synchronously before any sampling starts.
/// Convergence-quality issues (divergences, poor mixing) are *not* errors;
/// they are reported as data in the diagnostics output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DemandError {
    /// Input data is empty.
    #[error("empty input data")]
    EmptyData,

    /// Dimension mismatch between data structures.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A covariate value is outside its documented domain.
    #[error("invalid covariate at index {index}: {reason}")]
    InvalidCovariate { index: usize, reason: String },

    /// Date-related error in the boundary constructor.
    #[error("date error: {0}")]
    DateError(String),

    /// The log density or its gradient evaluated to a non-finite value.
    #[error("non-finite log density: {0}")]
    NonFiniteDensity(String),

    /// The fit was cancelled before any chain completed.
    #[error("fit cancelled before any chain completed")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_descriptive() {
        let err = DemandError::EmptyData;
        assert_eq!(err.to_string(), "empty input data");

        let err = DemandError::DimensionMismatch {
            expected: 10,
            got: 7,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 10, got 7");

        let err = DemandError::InvalidParameter("width must be positive".to_string());
        assert_eq!(err.to_string(), "invalid parameter: width must be positive");

        let err = DemandError::InvalidCovariate {
            index: 3,
            reason: "weekday must be in 1..=7".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid covariate at index 3: weekday must be in 1..=7"
        );
    }

    #[test]
    fn errors_are_clonable_and_comparable() {
        let err1 = DemandError::EmptyData;
        let err2 = err1.clone();
        assert_eq!(err1, err2);
    }
}
