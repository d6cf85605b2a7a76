//! Runtime configuration for a sync session.
//!
//! [`SyncConfig`] is a plain value with sensible defaults. It can be built
//! by hand, loaded from `TETHER_*` environment variables, or swapped at
//! runtime through the session's `watch` channel. Both transports read the
//! current value on every call, so address changes take effect on the
//! next `connect()` / request.

use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;

// ───────────────────────────────────────────────────────────────────
// Task cadence
// ───────────────────────────────────────────────────────────────────

/// Base periods of the four canonical session tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskIntervals {
    /// Reconnect attempt (only acts while disconnected).
    pub reconnect: Duration,
    /// Local status broadcast; halved while persistently connected.
    pub status_broadcast: Duration,
    /// Pull fallback; quartered with an open map, halved when connected.
    pub pull_fallback: Duration,
    /// Position interpolation tick.
    pub position_tick: Duration,
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self {
            reconnect: Duration::from_secs(10),
            status_broadcast: Duration::from_secs(5),
            pull_fallback: Duration::from_secs(10),
            position_tick: Duration::from_millis(300),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// SyncConfig
// ───────────────────────────────────────────────────────────────────

/// Session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Server base address; empty disables synchronization.
    pub server_address: String,
    /// Suppress sharing of the local member's location.
    pub ghost_mode: bool,
    /// Trailing markers kept per displayed member (0 = none).
    pub footstep_count: usize,
    /// Expose the local member's location even while in ghost mode.
    pub show_self: bool,
    /// Path of the persistent channel endpoint, appended to the address.
    pub socket_path: String,
    pub connect_timeout: Duration,
    /// Bounded wait for persistent-channel acknowledgements.
    pub ack_timeout: Duration,
    /// Bounded wait for polling requests.
    pub request_timeout: Duration,
    pub intervals: TaskIntervals,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_address: String::new(),
            ghost_mode: false,
            footstep_count: 0,
            show_self: false,
            socket_path: "/ws".to_string(),
            connect_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            intervals: TaskIntervals::default(),
        }
    }
}

impl SyncConfig {
    /// Config pointing at `address` with everything else defaulted.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            server_address: address.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `TETHER_SERVER_ADDRESS` -- server base address (default empty, disabled)
    /// - `TETHER_GHOST_MODE` -- `true`/`false` (default `false`)
    /// - `TETHER_FOOTSTEPS` -- trailing marker count (default 0)
    /// - `TETHER_SHOW_SELF` -- `true`/`false` (default `false`)
    /// - `TETHER_SOCKET_PATH` -- persistent channel path (default `/ws`)
    /// - `TETHER_CONNECT_TIMEOUT_MS`, `TETHER_ACK_TIMEOUT_MS`,
    ///   `TETHER_REQUEST_TIMEOUT_MS` -- timeouts in milliseconds
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            server_address: lookup("TETHER_SERVER_ADDRESS").unwrap_or_default(),
            ghost_mode: parse_or(&lookup, "TETHER_GHOST_MODE", defaults.ghost_mode)?,
            footstep_count: parse_or(&lookup, "TETHER_FOOTSTEPS", defaults.footstep_count)?,
            show_self: parse_or(&lookup, "TETHER_SHOW_SELF", defaults.show_self)?,
            socket_path: lookup("TETHER_SOCKET_PATH").unwrap_or(defaults.socket_path),
            connect_timeout: millis_or(&lookup, "TETHER_CONNECT_TIMEOUT_MS", defaults.connect_timeout)?,
            ack_timeout: millis_or(&lookup, "TETHER_ACK_TIMEOUT_MS", defaults.ack_timeout)?,
            request_timeout: millis_or(&lookup, "TETHER_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
            intervals: defaults.intervals,
        })
    }

    /// Parse and validate the configured server address.
    pub fn address(&self) -> Result<ServerAddress, ConfigError> {
        ServerAddress::parse(&self.server_address)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let fallback = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(lookup, key, fallback).map(Duration::from_millis)
}

// ───────────────────────────────────────────────────────────────────
// ServerAddress
// ───────────────────────────────────────────────────────────────────

/// Validated server base URL shared by both transports.
///
/// ```text
/// "example.org:8080/"  ──normalize──►  "http://example.org:8080"
///                      ──http_url("/ping/g")──►  http://example.org:8080/ping/g
///                      ──ws_url("/ws")──────────►  ws://example.org:8080/ws
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    base: String,
    secure: bool,
}

impl ServerAddress {
    /// Strip trailing slashes and add `http://` when no scheme is present.
    pub fn normalize(raw: &str) -> String {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Err(ConfigError::MissingAddress);
        }
        let base = Self::normalize(raw);
        let url = Url::parse(&base).map_err(|e| ConfigError::InvalidAddress {
            address: raw.to_string(),
            reason: e.to_string(),
        })?;
        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidAddress {
                address: raw.to_string(),
                reason: "missing host".to_string(),
            });
        }
        Ok(Self { base, secure })
    }

    /// The normalized base, e.g. `http://host:port`.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("{}{}", self.base, with_leading_slash(path))
    }

    /// The same endpoint with the WebSocket scheme.
    pub fn ws_url(&self, path: &str) -> String {
        let (from, to) = if self.secure { ("https://", "wss://") } else { ("http://", "ws://") };
        let rest = self.base.strip_prefix(from).unwrap_or(&self.base);
        format!("{to}{rest}{}", with_leading_slash(path))
    }
}

fn with_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
