//! Error taxonomy for frame inference.

use thiserror::Error;

/// Failures surfaced by the inference pipeline and the stream protocol.
///
/// None of these are fatal to a streaming session: each one is reported for the
/// frame (or message) that caused it and the session keeps accepting input.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Malformed image shape, empty payload, or unsupported control text.
    #[error("{0}")]
    InvalidInput(String),

    /// The detector is not loaded; the service runs degraded.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Compressed bytes could not be decoded into an image.
    #[error("{0}")]
    Decode(String),

    /// The detector backend failed while predicting.
    #[error("detector failed: {0:#}")]
    Backend(#[source] anyhow::Error),
}

impl InferenceError {
    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::InvalidInput(detail.into())
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::ServiceUnavailable(detail.into())
    }

    /// HTTP status used when this error ends a one-shot request.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) | Self::Decode(_) => 400,
            Self::ServiceUnavailable(_) | Self::Backend(_) => 503,
        }
    }
}
