//! Radio link integration: last-resort delivery and inbound frame routing.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use vicinity_core::protocol::{now_ms, RadioTextData};
use vicinity_core::{OutboundEvent, RouteError, VehicleId};
use vicinity_radio::frame::MAX_PAYLOAD;
use vicinity_radio::{Frame, FrameType, RadioLink, ShortIdRegistry};

use super::Hub;

/// The link handle plus the short ids handed out over it.
pub struct RadioBridge {
    link: RadioLink,
    short_ids: ShortIdRegistry,
}

impl RadioBridge {
    pub fn new(link: RadioLink) -> Self {
        Self {
            link,
            short_ids: ShortIdRegistry::new(),
        }
    }

    pub fn link(&self) -> &RadioLink {
        &self.link
    }

    fn short_id(&mut self, vehicle_id: &VehicleId) -> Option<u8> {
        match self.short_ids.allocate(vehicle_id) {
            Ok(short) => Some(short),
            Err(e) => {
                warn!(vehicle_id = %vehicle_id, error = %e, "no radio short id");
                None
            }
        }
    }
}

impl Hub {
    /// Text that no radio frame could carry is refused while a link is up.
    pub(super) fn check_radio_text(&self, content: &str) -> Result<(), RouteError> {
        let link_up = self.radio.as_ref().is_some_and(|r| r.link.is_up());
        if link_up && content.len() > MAX_PAYLOAD {
            return Err(RouteError::validation(format!(
                "content longer than {MAX_PAYLOAD} bytes cannot go over radio"
            )));
        }
        Ok(())
    }

    /// Offer a direct message to the radio link. `false` when there is no
    /// link, it is down, or ids cannot be allocated.
    pub(super) fn radio_send_text(&mut self, sender: &VehicleId, recipient: &VehicleId, content: &str) -> bool {
        let Some(radio) = self.radio.as_mut() else {
            return false;
        };
        if !radio.link.is_up() {
            return false;
        }
        let (Some(from), Some(to)) = (radio.short_id(sender), radio.short_id(recipient)) else {
            return false;
        };
        let sent = radio.link.send(&Frame::text(from, to, content));
        debug!(sender = %sender, recipient = %recipient, from, to, sent, "radio text");
        sent
    }

    pub(super) fn radio_send_emergency(&mut self, sender: &VehicleId, vehicle_info: &str) -> bool {
        let Some(radio) = self.radio.as_mut() else {
            return false;
        };
        if !radio.link.is_up() {
            return false;
        }
        let Some(from) = radio.short_id(sender) else {
            return false;
        };
        radio.link.send(&Frame::emergency(from, vehicle_info))
    }

    /// Frames heard on the link go to local sessions only; other instances
    /// hear the radio themselves.
    pub(super) fn on_radio_frame(&mut self, frame: &Frame) {
        let sender_id = match &self.radio {
            Some(radio) => radio.short_ids.sender_identity(frame.sender),
            None => VehicleId::from_raw(format!("radio:{}", frame.sender)),
        };

        match frame.kind {
            FrameType::Text => {
                let recipient = if frame.is_broadcast() {
                    None
                } else {
                    self.radio
                        .as_ref()
                        .and_then(|r| r.short_ids.resolve(frame.recipient))
                        .cloned()
                };
                let data = RadioTextData {
                    sender_id: sender_id.clone(),
                    sender_short_id: frame.sender,
                    recipient_id: recipient.clone(),
                    content: frame.text_lossy(),
                    emergency: false,
                    timestamp: now_ms(),
                };
                let event = OutboundEvent::RadioText(data);
                match recipient {
                    Some(ref vehicle_id) if self.send_to_vehicle(vehicle_id, &event) => {
                        debug!(sender = %sender_id, recipient = %vehicle_id, "radio text delivered");
                    }
                    _ => {
                        let sent = self.broadcast_local(event.to_json().into(), None);
                        debug!(sender = %sender_id, recipient = frame.recipient, sent, "radio text broadcast");
                    }
                }
            }
            FrameType::Emergency => {
                let content = frame.text_lossy();
                warn!(sender = %sender_id, short_id = frame.sender, "radio emergency");
                let event = OutboundEvent::RadioText(RadioTextData {
                    sender_id: sender_id.clone(),
                    sender_short_id: frame.sender,
                    recipient_id: None,
                    content: content.clone(),
                    emergency: true,
                    timestamp: now_ms(),
                });
                let sent = self.broadcast_local(event.to_json().into(), None);
                info!(sender = %sender_id, sent, "radio emergency relayed");
                self.record_event(
                    "radio_emergency",
                    Some(&sender_id),
                    json!({"shortId": frame.sender, "vehicleInfo": content, "receivedAt": Utc::now()}),
                );
            }
            FrameType::Reserved => {
                debug!(sender = frame.sender, recipient = frame.recipient, "reserved radio frame ignored");
            }
        }
    }
}
