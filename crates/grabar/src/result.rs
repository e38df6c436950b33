//! Result and error types for Grabar.

use thiserror::Error;

/// Result type for Grabar operations
pub type GrabarResult<T> = Result<T, GrabarError>;

/// Errors that can occur in Grabar
///
/// The taxonomy mirrors the pipeline stages: resolution and validation
/// failures are terminal (the input itself is unusable), capture and encode
/// failures are recovered by the export manager's strategy fallback loop,
/// and security violations are never retried.
#[derive(Debug, Error)]
pub enum GrabarError {
    /// No concrete surface could be resolved from the input reference
    #[error("Surface resolution failed: {message}")]
    ResolutionFailed {
        /// Error message
        message: String,
    },

    /// Surface is tainted by cross-origin content and cannot be read back
    #[error("Security violation: {message}")]
    SecurityViolation {
        /// Error message
        message: String,
    },

    /// Surface failed validation (dimensions, extraction methods)
    #[error("Surface validation failed: {message}")]
    ValidationFailed {
        /// Error message
        message: String,
    },

    /// Frame capture failed for every attempt in a session
    #[error("Frame capture failed: {message}")]
    CaptureFailed {
        /// Error message
        message: String,
    },

    /// Encoder rejected the frame set or failed internally
    #[error("Encoding failed: {message}")]
    EncodeFailed {
        /// Error message
        message: String,
    },

    /// Streaming session exceeded its wall-clock bound
    #[error("Recording exceeded wall-clock bound of {ms}ms")]
    TimeoutExceeded {
        /// Bound in milliseconds
        ms: u64,
    },

    /// Operation called in the wrong state
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// Image processing error (resizing, decoding, pixel conversion)
    #[error("Image processing failed: {message}")]
    ImageProcessing {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GrabarError {
    /// Whether the export manager may recover from this error by moving to
    /// the next encoding strategy
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CaptureFailed { .. } | Self::EncodeFailed { .. } | Self::ImageProcessing { .. }
        )
    }

    /// Whether this error must be surfaced immediately without any fallback
    #[must_use]
    pub fn is_security(&self) -> bool {
        matches!(self, Self::SecurityViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let err = GrabarError::EncodeFailed {
            message: "bad frame".to_string(),
        };
        assert!(err.is_recoverable());

        let err = GrabarError::ResolutionFailed {
            message: "no surface".to_string(),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_security_is_not_recoverable() {
        let err = GrabarError::SecurityViolation {
            message: "tainted".to_string(),
        };
        assert!(err.is_security());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = GrabarError::TimeoutExceeded { ms: 4000 };
        assert!(err.to_string().contains("4000ms"));

        let err = GrabarError::ValidationFailed {
            message: "zero width".to_string(),
        };
        assert!(err.to_string().contains("zero width"));
    }
}
