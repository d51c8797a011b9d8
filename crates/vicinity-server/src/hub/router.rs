//! Inbound dispatch: decode, registration gate, identity check, rate limit,
//! then the per-event handler.

use std::time::Instant;

use tracing::trace;
use vicinity_core::protocol::{self, TimestampData};
use vicinity_core::{ConnectionId, InboundEvent, OutboundEvent, RouteError};

use super::signaling::SyncKind;
use super::Hub;

impl Hub {
    pub(super) fn on_inbound(&mut self, connection_id: &ConnectionId, text: &str) {
        let result = protocol::decode(text).and_then(|event| self.route(connection_id, event));
        if let Err(err) = result {
            self.send_error(connection_id, &err);
        }
    }

    fn route(&mut self, connection_id: &ConnectionId, event: InboundEvent) -> Result<(), RouteError> {
        let kind = event.kind();
        trace!(connection_id = %connection_id, event = kind.name(), "inbound");

        let Some(vehicle_id) = self.registry.vehicle_of(connection_id).cloned() else {
            return match event {
                InboundEvent::Register(payload) => self.on_register(connection_id, payload),
                InboundEvent::Ping => {
                    self.send_to(connection_id, &OutboundEvent::Pong(TimestampData::now()));
                    Ok(())
                }
                _ => Err(RouteError::NotRegistered { event: kind.name() }),
            };
        };

        event.check_identity(&vehicle_id)?;

        if let Some(class) = kind.rate_class(self.config.exempt_ice_candidates) {
            self.limiter
                .allow(&vehicle_id, class, Instant::now())
                .map_err(|retry_after| RouteError::RateLimited {
                    class: class.name(),
                    retry_after,
                })?;
        }

        match event {
            InboundEvent::Register(payload) => self.on_register(connection_id, payload),
            InboundEvent::Heartbeat => {
                self.on_heartbeat(connection_id, &vehicle_id);
                Ok(())
            }
            InboundEvent::Ping => {
                self.send_to(connection_id, &OutboundEvent::Pong(TimestampData::now()));
                Ok(())
            }
            InboundEvent::LocationUpdate(payload) => self.on_location(&vehicle_id, &payload),
            InboundEvent::SendMessage(payload) => self.on_send_message(&vehicle_id, payload),
            InboundEvent::EmergencyAlert(payload) => {
                self.on_emergency(&vehicle_id, payload);
                Ok(())
            }
            InboundEvent::ConnectRequest(payload) => self.on_connect_request(&vehicle_id, payload),
            InboundEvent::ConnectResponse(payload) => self.on_connect_response(&vehicle_id, payload),
            InboundEvent::CallInitiate(payload) => self.on_call_initiate(&vehicle_id, payload),
            InboundEvent::WebrtcOffer(payload) => self.on_offer(&vehicle_id, payload),
            InboundEvent::WebrtcAnswer(payload) => self.on_answer(&vehicle_id, payload),
            InboundEvent::IceCandidate(payload) => self.on_ice_candidate(&vehicle_id, payload),
            InboundEvent::SyncDisconnect(payload) => {
                self.on_sync(&vehicle_id, payload, SyncKind::Disconnect)
            }
            InboundEvent::SyncEndCall(payload) => self.on_sync(&vehicle_id, payload, SyncKind::EndCall),
        }
    }
}
