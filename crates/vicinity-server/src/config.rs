//! Runtime configuration derived from [`VicinitySettings`].

use std::time::Duration;

use vicinity_core::rate_limit::{BucketConfig, RateLimitConfig};
use vicinity_settings::{BucketSettings, VicinitySettings};

/// Listener and per-connection transport settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ws_path: String,
    pub max_send_queue: usize,
    pub max_message_size: usize,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub hub_queue_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&VicinitySettings::default())
    }
}

impl From<&VicinitySettings> for ServerConfig {
    fn from(s: &VicinitySettings) -> Self {
        Self {
            host: s.server.host.clone(),
            port: s.server.port,
            ws_path: s.server.ws_path.clone(),
            max_send_queue: s.server.max_send_queue,
            max_message_size: s.server.max_message_size,
            ping_interval: Duration::from_secs(s.server.ws_ping_interval_secs),
            pong_timeout: Duration::from_secs(s.server.ws_pong_timeout_secs),
            hub_queue_size: s.server.hub_queue_size,
        }
    }
}

/// Routing, presence and proximity tuning for the hub.
#[derive(Clone, Debug)]
pub struct HubConfig {
    pub radius_m: f64,
    pub geohash_precision: usize,
    pub linear_scan_threshold: usize,
    pub min_update_interval: Duration,
    /// Zero disables the periodic proximity pass.
    pub broadcast_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
    pub rate_limits: RateLimitConfig,
    pub exempt_ice_candidates: bool,
    /// `None` keeps consent requests until answered.
    pub consent_ttl: Option<chrono::Duration>,
    pub call_retention: chrono::Duration,
    /// `None` lets unanswered calls ring until a party leaves.
    pub ring_timeout: Option<chrono::Duration>,
    pub auth_required: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from(&VicinitySettings::default())
    }
}

impl From<&VicinitySettings> for HubConfig {
    fn from(s: &VicinitySettings) -> Self {
        let bucket = |b: &BucketSettings| BucketConfig::new(b.capacity, b.interval_ms);
        let consent_ttl = (s.signaling.consent_ttl_secs > 0)
            .then(|| secs(s.signaling.consent_ttl_secs));
        let ring_timeout = (s.signaling.ring_timeout_secs > 0)
            .then(|| secs(s.signaling.ring_timeout_secs));

        Self {
            radius_m: s.proximity.radius_m,
            geohash_precision: s.proximity.geohash_precision,
            linear_scan_threshold: s.proximity.linear_scan_threshold,
            min_update_interval: Duration::from_millis(s.proximity.min_update_interval_ms),
            broadcast_interval: Duration::from_secs(s.proximity.broadcast_interval_secs),
            heartbeat_timeout: Duration::from_secs(s.presence.heartbeat_timeout_secs),
            sweep_interval: Duration::from_secs(s.presence.sweep_interval_secs),
            rate_limits: RateLimitConfig {
                location_update: bucket(&s.rate_limits.location_update),
                send_message: bucket(&s.rate_limits.send_message),
                signaling: bucket(&s.rate_limits.signaling),
                emergency_alert: bucket(&s.rate_limits.emergency_alert),
            },
            exempt_ice_candidates: s.rate_limits.exempt_ice_candidates,
            consent_ttl,
            call_retention: secs(s.signaling.call_retention_secs),
            ring_timeout,
            auth_required: s.auth.required,
        }
    }
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}
