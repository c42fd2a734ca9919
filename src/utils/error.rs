//! Error types and handling
//!
//! Common error types used across the stream engine and its collaborators.

use std::path::PathBuf;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The recorder failed to produce a segment
    #[error("Capture error: {0}")]
    Capture(String),

    /// A segment expected on disk is absent
    #[error("Segment does not exist or was not recorded: {0:?}")]
    MissingSegment(PathBuf),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Publish error: {0}")]
    Publish(String),

    /// A stream name could not be resolved or downloaded
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Manifest bytes could not be parsed
    #[error("Manifest format error: {0}")]
    Format(#[from] serde_json::Error),

    /// The content store could not report its own identity
    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Responder error: {0}")]
    Responder(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl AppError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::MissingSegment(_) => "MISSING_SEGMENT",
            AppError::Upload(_) => "UPLOAD_ERROR",
            AppError::Publish(_) => "PUBLISH_ERROR",
            AppError::Resolution(_) => "RESOLUTION_ERROR",
            AppError::Format(_) => "FORMAT_ERROR",
            AppError::Identity(_) => "IDENTITY_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Platform(_) => "PLATFORM_ERROR",
            AppError::Responder(_) => "RESPONDER_ERROR",
            AppError::InvalidState(_) => "INVALID_STATE",
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_per_taxonomy() {
        let capture = AppError::Capture("ffmpeg exited".to_string());
        let missing = AppError::MissingSegment(PathBuf::from("/tmp/sample_0.mp4"));
        assert_eq!(capture.code(), "CAPTURE_ERROR");
        assert_eq!(missing.code(), "MISSING_SEGMENT");
        assert!(missing.to_string().contains("sample_0.mp4"));
    }

    #[test]
    fn test_format_error_from_serde() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.code(), "FORMAT_ERROR");
    }
}
