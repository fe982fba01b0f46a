//! Error hierarchy for the discovery cache
//!
//! Errors are split by the layer that produces them:
//! - [`RegistryError`]: the registry transport (HTTP, decoding, timeouts)
//! - [`WatchError`]: the watch state machine; cloneable because one failure
//!   is delivered to every caller waiting on the same completion
//! - [`Error`]: crate-level umbrella returned by the public API

use config::ConfigError;

use crate::ResourceKind;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failures observed while waiting for a watched resource
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Failures talking to the registry outside of a watch
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The long-poll (or any other) request did not complete in time.
    ///
    /// A watch that reports this error is discarded instead of retried in place.
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    /// The registry answered with a non-success status
    #[error("registry returned {status} for {endpoint}: {message}")]
    Status {
        status: u16,
        endpoint: String,
        message: String,
    },

    /// Connection level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("failed to decode registry response: {0}")]
    Decode(String),

    /// The client handle could not be constructed
    #[error("registry client unavailable: {0}")]
    Unavailable(String),
}

impl RegistryError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RegistryError::Timeout { .. })
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        let endpoint = e.url().map(|u| u.path().to_string()).unwrap_or_default();
        if e.is_timeout() {
            RegistryError::Timeout { endpoint }
        } else if e.is_decode() {
            RegistryError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            RegistryError::Status {
                status: status.as_u16(),
                endpoint,
                message: e.to_string(),
            }
        } else {
            RegistryError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// A change event carried no usable endpoint or no KV value
    #[error("got empty or invalid {}", .0.payload_label())]
    EmptyUpdate(ResourceKind),

    /// The subscription reported an error
    #[error(transparent)]
    Transport(#[from] RegistryError),

    /// The producer side of the subscription went away
    #[error("subscription closed, resource={0}")]
    SubscriptionClosed(String),

    /// The cache was cleared while the caller was waiting
    #[error("discovery cache cleared")]
    Cleared,
}

impl WatchError {
    /// Hung long-poll connections are torn down immediately
    pub fn is_transport_timeout(&self) -> bool {
        matches!(self, WatchError::Transport(e) if e.is_timeout())
    }
}
