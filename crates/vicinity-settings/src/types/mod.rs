//! Settings type definitions.
//!
//! JSON field names are camelCase. Every section is `#[serde(default)]`, so a
//! partial file only needs the keys it changes.

mod integrations;
mod proximity;
mod server;

pub use integrations::*;
pub use proximity::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use vicinity_core::geo;

use crate::errors::{Result, SettingsError};

/// Root settings for the vicinity server.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "proximity": { "radiusM": 250 },
///   "radio": { "enabled": true, "device": "/dev/ttyUSB0" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VicinitySettings {
    pub server: ServerSettings,
    pub presence: PresenceSettings,
    pub proximity: ProximitySettings,
    pub rate_limits: RateLimitSettings,
    pub signaling: SignalingSettings,
    pub auth: AuthSettings,
    pub radio: RadioSettings,
    pub fanout: FanoutSettings,
    pub store: StoreSettings,
    pub telemetry: TelemetrySettings,
}

impl VicinitySettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));

        if !self.server.ws_path.starts_with('/') {
            return invalid("server.wsPath must start with '/'");
        }
        if self.server.max_send_queue == 0 || self.server.hub_queue_size == 0 {
            return invalid("server queue sizes must be at least 1");
        }
        if self.server.ws_ping_interval_secs == 0
            || self.server.ws_pong_timeout_secs < self.server.ws_ping_interval_secs
        {
            return invalid("server.wsPongTimeoutSecs must be >= wsPingIntervalSecs > 0");
        }
        if self.presence.heartbeat_timeout_secs == 0 || self.presence.sweep_interval_secs == 0 {
            return invalid("presence intervals must be positive");
        }
        if !(self.proximity.radius_m.is_finite() && self.proximity.radius_m > 0.0) {
            return invalid("proximity.radiusM must be positive");
        }
        if !(1..=12).contains(&self.proximity.geohash_precision) {
            return invalid("proximity.geohashPrecision must be within 1..=12");
        }
        let (precision, radius) = (self.proximity.geohash_precision, self.proximity.radius_m);
        if !geo::neighborhood_covers(precision, 0.0, radius) {
            let hint = geo::max_precision_for_radius(0.0, radius)
                .map_or_else(|| "a smaller radius".to_owned(), |p| format!("precision <= {p}"));
            return Err(SettingsError::InvalidValue(format!(
                "proximity.radiusM {radius} does not fit a precision-{precision} geohash neighborhood; use {hint}"
            )));
        }
        for (name, bucket) in [
            ("locationUpdate", &self.rate_limits.location_update),
            ("sendMessage", &self.rate_limits.send_message),
            ("signaling", &self.rate_limits.signaling),
            ("emergencyAlert", &self.rate_limits.emergency_alert),
        ] {
            if bucket.capacity == 0 || bucket.interval_ms == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "rateLimits.{name} needs a positive capacity and intervalMs"
                )));
            }
        }
        if self.auth.required && is_blank(self.auth.shared_secret.as_deref()) {
            return invalid("auth.required needs auth.sharedSecret");
        }
        if self.radio.enabled && is_blank(self.radio.device.as_deref()) {
            return invalid("radio.enabled needs radio.device");
        }
        if self.radio.queue_size == 0 || self.store.queue_size == 0 || self.fanout.capacity == 0 {
            return invalid("radio, store and fanout queue sizes must be at least 1");
        }
        Ok(())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}
