//! WebSocket wire protocol.
//!
//! Every frame is a JSON `{event, data}` envelope in both directions. Inbound
//! frames decode through a closed kind table first, so an unrecognized event
//! name is reported as such instead of as a shape error.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::RouteError;
use crate::geo::GeoPoint;
use crate::ids::{CallId, ConnectionId, MessageId, VehicleId};
use crate::proximity::Transition;
use crate::rate_limit::EventClass;

pub const MAX_CONTENT_LEN: usize = 4096;
pub const MAX_DISPLAY_NAME_LEN: usize = 64;
pub const MAX_VEHICLE_INFO_LEN: usize = 256;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum InboundKind {
    Register,
    Heartbeat,
    Ping,
    LocationUpdate,
    SendMessage,
    EmergencyAlert,
    ConnectRequest,
    ConnectResponse,
    CallInitiate,
    WebrtcOffer,
    WebrtcAnswer,
    IceCandidate,
    SyncDisconnect,
    SyncEndCall,
}

impl InboundKind {
    pub const ALL: [InboundKind; 14] = [
        Self::Register,
        Self::Heartbeat,
        Self::Ping,
        Self::LocationUpdate,
        Self::SendMessage,
        Self::EmergencyAlert,
        Self::ConnectRequest,
        Self::ConnectResponse,
        Self::CallInitiate,
        Self::WebrtcOffer,
        Self::WebrtcAnswer,
        Self::IceCandidate,
        Self::SyncDisconnect,
        Self::SyncEndCall,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Heartbeat => "heartbeat",
            Self::Ping => "ping",
            Self::LocationUpdate => "location_update",
            Self::SendMessage => "send_message",
            Self::EmergencyAlert => "emergency_alert",
            Self::ConnectRequest => "connect_request",
            Self::ConnectResponse => "connect_response",
            Self::CallInitiate => "call_initiate",
            Self::WebrtcOffer => "webrtc_offer",
            Self::WebrtcAnswer => "webrtc_answer",
            Self::IceCandidate => "ice_candidate",
            Self::SyncDisconnect => "sync_disconnect",
            Self::SyncEndCall => "sync_end_call",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Bucket this event draws from. `None` means never limited.
    pub fn rate_class(self, exempt_ice_candidates: bool) -> Option<EventClass> {
        match self {
            Self::Register | Self::Heartbeat | Self::Ping => None,
            Self::LocationUpdate => Some(EventClass::LocationUpdate),
            Self::SendMessage => Some(EventClass::SendMessage),
            Self::EmergencyAlert => Some(EventClass::EmergencyAlert),
            Self::IceCandidate if exempt_ice_candidates => None,
            Self::ConnectRequest
            | Self::ConnectResponse
            | Self::CallInitiate
            | Self::WebrtcOffer
            | Self::WebrtcAnswer
            | Self::IceCandidate
            | Self::SyncDisconnect
            | Self::SyncEndCall => Some(EventClass::Signaling),
        }
    }

    pub fn requires_registration(self) -> bool {
        !matches!(self, Self::Register | Self::Ping)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub vehicle_id: VehicleId,
    #[serde(default)]
    pub driver_name: Option<String>,
    #[serde(default)]
    pub vehicle_info: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl RegisterPayload {
    /// Trimmed display name, falling back to the vehicle id.
    pub fn display_name(&self) -> String {
        self.driver_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.vehicle_id.as_str())
            .to_owned()
    }

    fn validate(&self) -> Result<(), RouteError> {
        if let Some(name) = &self.driver_name {
            if name.trim().chars().count() > MAX_DISPLAY_NAME_LEN {
                return Err(RouteError::validation(format!(
                    "driverName longer than {MAX_DISPLAY_NAME_LEN} characters"
                )));
            }
        }
        check_vehicle_info(self.vehicle_info.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub vehicle_id: VehicleId,
    pub lat: f64,
    pub lon: f64,
}

impl LocationPayload {
    pub fn point(&self) -> Result<GeoPoint, RouteError> {
        GeoPoint::new(self.lat, self.lon)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub sender_id: VehicleId,
    pub recipient_id: VehicleId,
    pub content: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub sent_ts: Option<i64>,
}

impl SendMessagePayload {
    pub fn message_type(&self) -> &str {
        self.message_type.as_deref().unwrap_or("text")
    }

    fn validate(&self) -> Result<(), RouteError> {
        if self.content.trim().is_empty() {
            return Err(RouteError::validation("content must not be empty"));
        }
        if self.content.len() > MAX_CONTENT_LEN {
            return Err(RouteError::validation(format!(
                "content longer than {MAX_CONTENT_LEN} bytes"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyPayload {
    pub sender_id: VehicleId,
    #[serde(default)]
    pub vehicle_info: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequestPayload {
    pub requester_id: VehicleId,
    pub target_id: VehicleId,
    #[serde(default)]
    pub purpose: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponsePayload {
    pub requester_id: VehicleId,
    pub target_id: VehicleId,
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInitiatePayload {
    pub caller_id: VehicleId,
    pub callee_id: VehicleId,
}

/// Offer or answer. Fields beyond `targetId`/`sdp` are relayed untouched.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpPayload {
    pub target_id: VehicleId,
    pub sdp: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcePayload {
    pub target_id: VehicleId,
    pub candidate: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub from_vehicle_id: VehicleId,
    pub to_vehicle_id: VehicleId,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    Register(RegisterPayload),
    Heartbeat,
    Ping,
    LocationUpdate(LocationPayload),
    SendMessage(SendMessagePayload),
    EmergencyAlert(EmergencyPayload),
    ConnectRequest(ConnectRequestPayload),
    ConnectResponse(ConnectResponsePayload),
    CallInitiate(CallInitiatePayload),
    WebrtcOffer(SdpPayload),
    WebrtcAnswer(SdpPayload),
    IceCandidate(IcePayload),
    SyncDisconnect(SyncPayload),
    SyncEndCall(SyncPayload),
}

impl InboundEvent {
    pub fn kind(&self) -> InboundKind {
        match self {
            Self::Register(_) => InboundKind::Register,
            Self::Heartbeat => InboundKind::Heartbeat,
            Self::Ping => InboundKind::Ping,
            Self::LocationUpdate(_) => InboundKind::LocationUpdate,
            Self::SendMessage(_) => InboundKind::SendMessage,
            Self::EmergencyAlert(_) => InboundKind::EmergencyAlert,
            Self::ConnectRequest(_) => InboundKind::ConnectRequest,
            Self::ConnectResponse(_) => InboundKind::ConnectResponse,
            Self::CallInitiate(_) => InboundKind::CallInitiate,
            Self::WebrtcOffer(_) => InboundKind::WebrtcOffer,
            Self::WebrtcAnswer(_) => InboundKind::WebrtcAnswer,
            Self::IceCandidate(_) => InboundKind::IceCandidate,
            Self::SyncDisconnect(_) => InboundKind::SyncDisconnect,
            Self::SyncEndCall(_) => InboundKind::SyncEndCall,
        }
    }

    /// The identity the sender claims inside the payload, if the event carries one.
    pub fn claimed_identity(&self) -> Option<(&'static str, &VehicleId)> {
        match self {
            Self::LocationUpdate(p) => Some(("vehicleId", &p.vehicle_id)),
            Self::SendMessage(p) => Some(("senderId", &p.sender_id)),
            Self::EmergencyAlert(p) => Some(("senderId", &p.sender_id)),
            Self::ConnectRequest(p) => Some(("requesterId", &p.requester_id)),
            // The responder is the target of the original request.
            Self::ConnectResponse(p) => Some(("targetId", &p.target_id)),
            Self::CallInitiate(p) => Some(("callerId", &p.caller_id)),
            Self::SyncDisconnect(p) | Self::SyncEndCall(p) => Some(("fromVehicleId", &p.from_vehicle_id)),
            Self::Register(_)
            | Self::Heartbeat
            | Self::Ping
            | Self::WebrtcOffer(_)
            | Self::WebrtcAnswer(_)
            | Self::IceCandidate(_) => None,
        }
    }

    /// Reject payloads whose claimed identity differs from the registered one.
    pub fn check_identity(&self, registered: &VehicleId) -> Result<(), RouteError> {
        match self.claimed_identity() {
            Some((field, claimed)) if claimed != registered => Err(RouteError::validation(format!(
                "sender_mismatch: {field} {claimed} does not match registered vehicle {registered}"
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decode and shape-validate one inbound text frame.
pub fn decode(text: &str) -> Result<InboundEvent, RouteError> {
    let raw: RawEnvelope = serde_json::from_str(text)
        .map_err(|e| RouteError::validation(format!("malformed message: {e}")))?;

    let kind = InboundKind::from_name(&raw.event).ok_or(RouteError::UnknownEvent(raw.event))?;

    let data = match raw.data {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };

    let event = match kind {
        InboundKind::Register => {
            let p: RegisterPayload = payload(kind, data)?;
            p.validate()?;
            InboundEvent::Register(p)
        }
        InboundKind::Heartbeat => InboundEvent::Heartbeat,
        InboundKind::Ping => InboundEvent::Ping,
        InboundKind::LocationUpdate => {
            let p: LocationPayload = payload(kind, data)?;
            p.point()?;
            InboundEvent::LocationUpdate(p)
        }
        InboundKind::SendMessage => {
            let p: SendMessagePayload = payload(kind, data)?;
            p.validate()?;
            InboundEvent::SendMessage(p)
        }
        InboundKind::EmergencyAlert => {
            let p: EmergencyPayload = payload(kind, data)?;
            check_vehicle_info(p.vehicle_info.as_deref())?;
            InboundEvent::EmergencyAlert(p)
        }
        InboundKind::ConnectRequest => {
            let p: ConnectRequestPayload = payload(kind, data)?;
            check_distinct(&p.requester_id, &p.target_id)?;
            InboundEvent::ConnectRequest(p)
        }
        InboundKind::ConnectResponse => InboundEvent::ConnectResponse(payload(kind, data)?),
        InboundKind::CallInitiate => {
            let p: CallInitiatePayload = payload(kind, data)?;
            check_distinct(&p.caller_id, &p.callee_id)?;
            InboundEvent::CallInitiate(p)
        }
        InboundKind::WebrtcOffer => InboundEvent::WebrtcOffer(sdp_payload(kind, data)?),
        InboundKind::WebrtcAnswer => InboundEvent::WebrtcAnswer(sdp_payload(kind, data)?),
        InboundKind::IceCandidate => {
            let p: IcePayload = payload(kind, data)?;
            if p.candidate.is_null() {
                return Err(RouteError::validation("ice_candidate requires candidate"));
            }
            InboundEvent::IceCandidate(p)
        }
        InboundKind::SyncDisconnect => InboundEvent::SyncDisconnect(payload(kind, data)?),
        InboundKind::SyncEndCall => InboundEvent::SyncEndCall(payload(kind, data)?),
    };
    Ok(event)
}

fn payload<T: serde::de::DeserializeOwned>(kind: InboundKind, data: Value) -> Result<T, RouteError> {
    serde_json::from_value(data)
        .map_err(|e| RouteError::validation(format!("invalid {} payload: {e}", kind.name())))
}

fn sdp_payload(kind: InboundKind, data: Value) -> Result<SdpPayload, RouteError> {
    let p: SdpPayload = payload(kind, data)?;
    if p.sdp.is_null() {
        return Err(RouteError::validation(format!("{} requires sdp", kind.name())));
    }
    Ok(p)
}

fn check_vehicle_info(info: Option<&str>) -> Result<(), RouteError> {
    match info {
        Some(info) if info.chars().count() > MAX_VEHICLE_INFO_LEN => Err(RouteError::validation(
            format!("vehicleInfo longer than {MAX_VEHICLE_INFO_LEN} characters"),
        )),
        _ => Ok(()),
    }
}

fn check_distinct(a: &VehicleId, b: &VehicleId) -> Result<(), RouteError> {
    if a == b {
        return Err(RouteError::validation(format!("{a} cannot target itself")));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedData {
    pub connection_id: ConnectionId,
    pub server_time: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredData {
    pub vehicle_id: VehicleId,
    pub driver_name: String,
    pub connection_id: ConnectionId,
    pub server_time: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&RouteError> for ErrorData {
    fn from(err: &RouteError) -> Self {
        Self {
            code: err.code().to_owned(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceData {
    pub vehicle_id: VehicleId,
    pub driver_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_info: Option<String>,
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyEntry {
    pub vehicle_id: VehicleId,
    pub driver_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_info: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub distance_m: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearbyData {
    pub vehicles: Vec<NearbyEntry>,
    pub radius: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityData {
    pub event_type: Transition,
    pub peer_vehicle_id: VehicleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLocationData {
    pub vehicle_id: VehicleId,
    pub lat: f64,
    pub lon: f64,
    pub distance_m: f64,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveMessageData {
    pub message_id: MessageId,
    pub sender_id: VehicleId,
    pub recipient_id: VehicleId,
    pub content: String,
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_ts: Option<i64>,
    pub received_ts: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Written to the recipient's local connection.
    Delivered,
    /// Published on the cross-process channel.
    Relayed,
    /// Handed to the radio link.
    Radio,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Relayed => "relayed",
            Self::Radio => "radio",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSentData {
    pub message_id: MessageId,
    pub recipient_id: VehicleId,
    pub status: DeliveryStatus,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyData {
    pub sender_id: VehicleId,
    pub driver_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequestData {
    pub requester_id: VehicleId,
    pub target_id: VehicleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponseData {
    pub requester_id: VehicleId,
    pub target_id: VehicleId,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInitiateData {
    pub call_id: CallId,
    pub caller_id: VehicleId,
    pub callee_id: VehicleId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpRelayData {
    pub from_vehicle_id: VehicleId,
    pub target_id: VehicleId,
    pub sdp: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Keys the server writes on relayed signaling. A client copy of any of
/// them is dropped so the stamped sender is the only one on the wire.
const RELAY_RESERVED_KEYS: [&str; 4] = ["fromVehicleId", "targetId", "sdp", "candidate"];

fn passthrough(mut extra: Map<String, Value>) -> Map<String, Value> {
    extra.retain(|key, _| !RELAY_RESERVED_KEYS.contains(&key.as_str()));
    extra
}

impl SdpRelayData {
    pub fn from_payload(from: &VehicleId, p: SdpPayload) -> Self {
        Self {
            from_vehicle_id: from.clone(),
            target_id: p.target_id,
            sdp: p.sdp,
            extra: passthrough(p.extra),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceRelayData {
    pub from_vehicle_id: VehicleId,
    pub target_id: VehicleId,
    pub candidate: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IceRelayData {
    pub fn from_payload(from: &VehicleId, p: IcePayload) -> Self {
        Self {
            from_vehicle_id: from.clone(),
            target_id: p.target_id,
            candidate: p.candidate,
            extra: passthrough(p.extra),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncData {
    pub from_vehicle_id: VehicleId,
    pub to_vehicle_id: VehicleId,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioTextData {
    pub sender_id: VehicleId,
    pub sender_short_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<VehicleId>,
    pub content: String,
    pub emergency: bool,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimestampData {
    pub timestamp: i64,
}

impl TimestampData {
    pub fn now() -> Self {
        Self { timestamp: now_ms() }
    }
}

/// Server-to-client events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    Connected(ConnectedData),
    Registered(RegisteredData),
    Error(ErrorData),
    PresenceUpdate(PresenceData),
    NearbyVehicles(NearbyData),
    ProximityEvent(ProximityData),
    PeerLocation(PeerLocationData),
    ReceiveMessage(ReceiveMessageData),
    MessageSent(MessageSentData),
    EmergencyAlert(EmergencyData),
    ConnectRequest(ConnectRequestData),
    ConnectResponse(ConnectResponseData),
    CallInitiate(CallInitiateData),
    WebrtcOffer(SdpRelayData),
    WebrtcAnswer(SdpRelayData),
    IceCandidate(IceRelayData),
    SyncDisconnect(SyncData),
    SyncEndCall(SyncData),
    RadioText(RadioTextData),
    HeartbeatAck(TimestampData),
    Pong(TimestampData),
}

impl OutboundEvent {
    pub fn error(err: &RouteError) -> Self {
        Self::Error(ErrorData::from(err))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Registered(_) => "registered",
            Self::Error(_) => "error",
            Self::PresenceUpdate(_) => "presence_update",
            Self::NearbyVehicles(_) => "nearby_vehicles",
            Self::ProximityEvent(_) => "proximity_event",
            Self::PeerLocation(_) => "peer_location",
            Self::ReceiveMessage(_) => "receive_message",
            Self::MessageSent(_) => "message_sent",
            Self::EmergencyAlert(_) => "emergency_alert",
            Self::ConnectRequest(_) => "connect_request",
            Self::ConnectResponse(_) => "connect_response",
            Self::CallInitiate(_) => "call_initiate",
            Self::WebrtcOffer(_) => "webrtc_offer",
            Self::WebrtcAnswer(_) => "webrtc_answer",
            Self::IceCandidate(_) => "ice_candidate",
            Self::SyncDisconnect(_) => "sync_disconnect",
            Self::SyncEndCall(_) => "sync_end_call",
            Self::RadioText(_) => "radio_text",
            Self::HeartbeatAck(_) => "heartbeat_ack",
            Self::Pong(_) => "pong",
        }
    }

    /// Serialize to the wire envelope.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"event":"error","data":{{"code":"internal","message":"failed to encode {}: {}"}}}}"#,
                self.name(),
                e.to_string().replace('"', "'")
            )
        })
    }
}
