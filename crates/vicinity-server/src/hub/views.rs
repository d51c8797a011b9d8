//! Read-only snapshots served over HTTP.

use chrono::{DateTime, Utc};
use serde::Serialize;
use vicinity_core::VehicleId;
use vicinity_radio::LinkStats;

/// Public fields of a registered vehicle. Connection ids stay internal.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleView {
    pub vehicle_id: VehicleId,
    pub driver_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geohash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_updated_at: Option<DateTime<Utc>>,
    pub connected_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub connections: usize,
    pub vehicles: usize,
    pub located: usize,
    pub live_calls: usize,
    pub pending_consents: usize,
    pub coalesced_total: u64,
    pub rate_limited_total: u64,
    pub dropped_sends_total: u64,
    pub persist_dropped_total: u64,
    pub fanout_enabled: bool,
    pub remote_vehicles: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radio: Option<LinkStats>,
}
