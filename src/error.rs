//! Error types
//!
//! Setup mistakes that make a run untrustworthy. These abort the run instead
//! of being recorded as test outcomes.

use thiserror::Error;

/// Fatal configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Malformed {marker} marker '{value}' in {test}: expected an integer")]
    MalformedMarker {
        marker: &'static str,
        value: String,
        test: String,
    },

    #[error("Unsupported image kind '{0}' (expected file, base64, bin or url)")]
    UnsupportedImageKind(String),

    #[error("Failed to save image for {test}: {reason}")]
    ImageSave { test: String, reason: String },

    #[error("Nested output capture for {test}: this thread is already capturing")]
    NestedCapture { test: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
