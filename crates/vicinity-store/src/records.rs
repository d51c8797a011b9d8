use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vicinity_core::{MessageId, VehicleId};

/// Registration snapshot of a vehicle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub vehicle_id: VehicleId,
    pub driver_name: String,
    pub vehicle_info: Option<String>,
    pub seen_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender_id: VehicleId,
    pub recipient_id: VehicleId,
    pub content: String,
    pub message_type: String,
    pub status: String,
    pub sent_ts: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub kind: String,
    pub vehicle_id: Option<VehicleId>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// One best-effort write.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    VehicleOnline(VehicleSnapshot),
    VehicleOffline {
        vehicle_id: VehicleId,
        reason: String,
        at: DateTime<Utc>,
    },
    VehicleLocation {
        vehicle_id: VehicleId,
        lat: f64,
        lon: f64,
        at: DateTime<Utc>,
    },
    Message(MessageRecord),
    Event(EventRecord),
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::VehicleOnline(_) => "vehicle_online",
            Self::VehicleOffline { .. } => "vehicle_offline",
            Self::VehicleLocation { .. } => "vehicle_location",
            Self::Message(_) => "message",
            Self::Event(_) => "event",
        }
    }
}

/// Persisted vehicle row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleRow {
    pub vehicle_id: VehicleId,
    pub driver_name: String,
    pub vehicle_info: Option<String>,
    pub online: bool,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    pub first_seen_at: String,
    pub last_seen_at: String,
    pub offline_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub id: i64,
    pub kind: String,
    pub vehicle_id: Option<VehicleId>,
    pub payload: Value,
    pub created_at: String,
}
