//! Error types for transition requests and status reads.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by a status provider.
///
/// Cloneable so a terminal `Failed` outcome can be handed to every
/// subscriber of a watch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The remote API does not know the resource.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The remote API refused the call (auth, permissions, validation).
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The call did not complete within the request timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure (connection refused, reset, DNS).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// The initial transition request failed. No watch was created.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The resource id was empty.
    #[error("resource id cannot be empty")]
    InvalidResource,

    /// Reading the current state before the request failed
    /// (authoritative target resolution only).
    #[error("failed to read current state of {resource}: {source}")]
    StateRead {
        resource: String,
        #[source]
        source: ProviderError,
    },

    /// The provider rejected or failed the transition request.
    #[error("transition request for {resource} failed: {source}")]
    Provider {
        resource: String,
        #[source]
        source: ProviderError,
    },
}

impl RequestError {
    /// The underlying provider error, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::InvalidResource => None,
            Self::StateRead { source, .. } | Self::Provider { source, .. } => Some(source),
        }
    }
}

/// A single status read failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("poll of {resource} failed: {source}")]
pub struct PollError {
    pub resource: String,
    #[source]
    pub source: ProviderError,
}

/// Invalid poll policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("poll interval must be greater than zero")]
    ZeroInterval,

    #[error("request timeout must be greater than zero")]
    ZeroRequestTimeout,

    #[error("poll interval must not exceed {max:?}")]
    IntervalTooLong { max: Duration },

    #[error("max_attempts must be at least 1 when set")]
    ZeroAttempts,

    #[error("max_duration must be greater than zero when set")]
    ZeroDuration,

    #[error("max_consecutive_failures must be at least 1")]
    ZeroFailureThreshold,
}
