//! Location pipeline and rate limiting.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProximitySettings {
    /// Nearby search radius in meters.
    pub radius_m: f64,
    /// Geohash cell precision used by the spatial index.
    pub geohash_precision: usize,
    /// Below this many located vehicles, queries scan linearly.
    pub linear_scan_threshold: usize,
    /// Minimum spacing between processed location updates per vehicle.
    pub min_update_interval_ms: u64,
    /// Periodic nearby recomputation for every located vehicle. 0 disables.
    pub broadcast_interval_secs: u64,
}

impl Default for ProximitySettings {
    fn default() -> Self {
        Self {
            radius_m: 500.0,
            geohash_precision: 6,
            linear_scan_threshold: 50,
            min_update_interval_ms: 150,
            broadcast_interval_secs: 10,
        }
    }
}

/// One token bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSettings {
    pub capacity: u32,
    pub interval_ms: u64,
}

impl BucketSettings {
    pub const fn new(capacity: u32, interval_ms: u64) -> Self {
        Self { capacity, interval_ms }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    pub location_update: BucketSettings,
    pub send_message: BucketSettings,
    pub signaling: BucketSettings,
    pub emergency_alert: BucketSettings,
    /// Let `ice_candidate` bypass the signaling bucket. Candidate trickle
    /// is bursty by nature.
    pub exempt_ice_candidates: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            location_update: BucketSettings::new(5, 1_000),
            send_message: BucketSettings::new(3, 1_000),
            signaling: BucketSettings::new(2, 1_000),
            emergency_alert: BucketSettings::new(1, 10_000),
            exempt_ice_candidates: true,
        }
    }
}
