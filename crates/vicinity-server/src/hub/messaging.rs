//! Direct messages and emergency alerts.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};
use vicinity_core::protocol::{
    now_ms, DeliveryStatus, EmergencyData, EmergencyPayload, MessageSentData, ReceiveMessageData,
    SendMessagePayload,
};
use vicinity_core::{MessageId, OutboundEvent, RouteError, VehicleId};
use vicinity_store::{MessageRecord, Record};

use super::{Hub, Reach};

impl Hub {
    /// Local session, then fanout, then radio. Offline everywhere is an error.
    pub(super) fn on_send_message(
        &mut self,
        sender_id: &VehicleId,
        payload: SendMessagePayload,
    ) -> Result<(), RouteError> {
        let message_id = MessageId::new();
        let message_type = payload.message_type().to_owned();
        let event = OutboundEvent::ReceiveMessage(ReceiveMessageData {
            message_id: message_id.clone(),
            sender_id: sender_id.clone(),
            recipient_id: payload.recipient_id.clone(),
            content: payload.content.clone(),
            message_type: message_type.clone(),
            sent_ts: payload.sent_ts,
            received_ts: now_ms(),
        });

        let status = match self.deliver(&payload.recipient_id, &event) {
            Reach::Local => DeliveryStatus::Delivered,
            Reach::Relayed => DeliveryStatus::Relayed,
            Reach::Unreachable => {
                self.check_radio_text(&payload.content)?;
                if !self.radio_send_text(sender_id, &payload.recipient_id, &payload.content) {
                    return Err(RouteError::TargetOffline(payload.recipient_id.to_string()));
                }
                DeliveryStatus::Radio
            }
        };
        debug!(
            message_id = %message_id,
            sender_id = %sender_id,
            recipient_id = %payload.recipient_id,
            status = status.as_str(),
            "message routed"
        );

        self.send_to_vehicle(
            sender_id,
            &OutboundEvent::MessageSent(MessageSentData {
                message_id: message_id.clone(),
                recipient_id: payload.recipient_id.clone(),
                status,
                timestamp: now_ms(),
            }),
        );

        self.persist(Record::Message(MessageRecord {
            id: message_id,
            sender_id: sender_id.clone(),
            recipient_id: payload.recipient_id,
            content: payload.content,
            message_type,
            status: status.as_str().to_owned(),
            sent_ts: payload.sent_ts,
            created_at: Utc::now(),
        }));
        Ok(())
    }

    /// Broadcast to every other vehicle and, when the link is up, over radio.
    pub(super) fn on_emergency(&mut self, sender_id: &VehicleId, payload: EmergencyPayload) {
        let Some(session) = self.registry.get(sender_id) else {
            return;
        };
        let vehicle_info = payload
            .vehicle_info
            .or_else(|| session.vehicle_info.clone());
        let location = session.location;
        let data = EmergencyData {
            sender_id: sender_id.clone(),
            driver_name: session.driver_name.clone(),
            vehicle_info: vehicle_info.clone(),
            lat: location.map(|l| l.point.lat),
            lon: location.map(|l| l.point.lon),
            timestamp: now_ms(),
        };

        warn!(sender_id = %sender_id, lat = ?data.lat, lon = ?data.lon, "emergency alert");
        self.broadcast(&OutboundEvent::EmergencyAlert(data.clone()), Some(sender_id));
        let radio = self.radio_send_emergency(sender_id, vehicle_info.as_deref().unwrap_or_default());

        self.record_event(
            "emergency_alert",
            Some(sender_id),
            json!({
                "driverName": data.driver_name,
                "vehicleInfo": data.vehicle_info,
                "lat": data.lat,
                "lon": data.lon,
                "radio": radio,
            }),
        );
    }
}
