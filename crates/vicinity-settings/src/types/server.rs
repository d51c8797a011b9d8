//! Network surface and session lifecycle settings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// HTTP/WebSocket listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. 0 picks an ephemeral port.
    pub port: u16,
    /// WebSocket upgrade path.
    pub ws_path: String,
    /// Per-connection outbound queue depth.
    pub max_send_queue: usize,
    /// Largest accepted inbound WebSocket message in bytes.
    pub max_message_size: usize,
    /// Interval between transport-level pings.
    pub ws_ping_interval_secs: u64,
    /// Close the socket if no pong arrives within this window.
    pub ws_pong_timeout_secs: u64,
    /// Hub command queue depth.
    pub hub_queue_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            ws_path: "/ws".to_string(),
            max_send_queue: 256,
            max_message_size: 64 * 1024,
            ws_ping_interval_secs: 30,
            ws_pong_timeout_secs: 60,
            hub_queue_size: 4096,
        }
    }
}

/// Registry liveness settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    /// Sessions without a heartbeat for this long are closed as stale.
    pub heartbeat_timeout_secs: u64,
    /// How often the stale sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

/// Call and consent bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalingSettings {
    /// Pending connect requests older than this are dropped. 0 keeps them
    /// until answered.
    pub consent_ttl_secs: u64,
    /// How long ended calls stay queryable.
    pub call_retention_secs: u64,
    /// Unanswered calls are ended after this long. 0 lets them ring until
    /// a party leaves.
    pub ring_timeout_secs: u64,
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            consent_ttl_secs: 0,
            call_retention_secs: 600,
            ring_timeout_secs: 60,
        }
    }
}

/// Token verification on `register`.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Reject registrations without a valid token.
    pub required: bool,
    /// Secret used to derive per-vehicle tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("required", &self.required)
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
