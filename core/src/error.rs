//! Error types for the toggle client.
//!
//! # Design
//! One enum covers the three kinds of failure a caller can see: bad
//! configuration at construction, a failed fetch, and reading toggles before
//! any fetch has succeeded. `is_configuration_error` and `is_fetch_error`
//! group the variants so callers can branch on the kind without listing
//! every variant.

use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by `ToggleClient` and `ClientConfig::validate`.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A required configuration field was missing or empty.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// The configured base URL could not be parsed as an absolute URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The server answered with neither a 2xx status nor 304.
    #[error("unable to fetch toggles: HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The transport failed before a response was received.
    #[error("transport error: {0}")]
    Transport(#[source] BoxedError),

    /// A 2xx response body was not a valid toggles payload.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// No fetch has completed successfully yet.
    #[error("toggles not downloaded yet")]
    NotReady,
}

impl ClientError {
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::MissingField(_) | Self::InvalidUrl(_))
    }

    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::Transport(_) | Self::DeserializationError(_)
        )
    }
}
