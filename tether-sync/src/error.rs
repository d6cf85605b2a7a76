//! Error types for the sync engine.
//!
//! Transport failures are surfaced as [`TransportError`] by the two
//! transports and swallowed (logged) at the coordinator boundary. Config
//! and state errors are returned to the caller.

use std::time::Duration;

/// Problems with the configured server address or environment settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No server address is configured; synchronization is disabled.
    #[error("no server address configured")]
    MissingAddress,

    /// The address could not be parsed as a URL.
    #[error("invalid server address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The address parsed but uses a protocol other than http/https.
    #[error("unsupported scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),

    /// An environment variable held a value of the wrong type.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Failures of a single transport call.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    /// The persistent channel is not in the `Connected` state.
    #[error("persistent channel is not connected")]
    NotConnected,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body or frame did not decode.
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("request failed: {0}")]
    Request(String),

    /// The connection closed before the acknowledgement arrived.
    #[error("channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Malformed(e.to_string())
    }
}

/// Group state misuse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// The name is not part of the fixed roster.
    #[error("unknown member {0:?}")]
    UnknownMember(String),

    /// The member has no known location to interpolate toward.
    #[error("member {0:?} has no location")]
    NoLocation(String),
}

/// Umbrella error for callers that don't care which layer failed.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    State(#[from] StateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts_into_transport_error() {
        let err: TransportError = ConfigError::MissingAddress.into();
        assert!(matches!(err, TransportError::Config(ConfigError::MissingAddress)));
        assert_eq!(err.to_string(), "no server address configured");
    }

    #[test]
    fn test_status_error_message() {
        let err = TransportError::Status { status: 503, body: "down".into() };
        assert_eq!(err.to_string(), "server returned 503: down");
    }

    #[test]
    fn test_sync_error_wraps_state_error() {
        let err: SyncError = StateError::UnknownMember("Zed".into()).into();
        assert_eq!(err.to_string(), "unknown member \"Zed\"");
    }
}
