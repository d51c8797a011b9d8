//! Registration, heartbeats, disconnects and the stale sweep.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use vicinity_core::protocol::{
    now_ms, ConnectedData, PresenceData, PresenceStatus, RegisterPayload, RegisteredData, TimestampData,
};
use vicinity_core::{ConnectionId, OutboundEvent, RouteError, VehicleId};
use vicinity_store::{Record, VehicleSnapshot};

use super::registry::VehicleSession;
use super::{Hub, HubCommand};
use crate::connection::CLOSE_STALE;

impl Hub {
    pub(super) fn on_connected(&self, connection_id: &ConnectionId) {
        debug!(connection_id = %connection_id, "connection opened");
        self.send_to(
            connection_id,
            &OutboundEvent::Connected(ConnectedData {
                connection_id: connection_id.clone(),
                server_time: now_ms(),
            }),
        );
    }

    pub(super) fn on_register(
        &mut self,
        connection_id: &ConnectionId,
        payload: RegisterPayload,
    ) -> Result<(), RouteError> {
        self.check_rebind(connection_id, &payload.vehicle_id)?;

        if !self.config.auth_required {
            self.complete_registration(connection_id, payload);
            return Ok(());
        }

        let verifier = Arc::clone(&self.verifier);
        let hub = self.self_tx.clone();
        let connection_id = connection_id.clone();
        tokio::spawn(async move {
            let verdict = verifier
                .verify(&payload.vehicle_id, payload.auth_token.as_deref())
                .await;
            if let Some(tx) = hub.upgrade() {
                let _ = tx
                    .send(HubCommand::AuthVerdict {
                        connection_id,
                        payload,
                        verdict,
                    })
                    .await;
            }
        });
        Ok(())
    }

    pub(super) fn on_auth_verdict(
        &mut self,
        connection_id: &ConnectionId,
        payload: RegisterPayload,
        verdict: Result<(), String>,
    ) {
        if !self.connections.contains(connection_id) {
            debug!(connection_id = %connection_id, "connection closed before auth completed");
            return;
        }
        match verdict {
            Ok(()) => {
                if let Err(err) = self.check_rebind(connection_id, &payload.vehicle_id) {
                    self.send_error(connection_id, &err);
                    return;
                }
                self.complete_registration(connection_id, payload);
            }
            Err(reason) => {
                warn!(vehicle_id = %payload.vehicle_id, reason = %reason, "registration rejected");
                self.send_error(connection_id, &RouteError::Auth(reason));
            }
        }
    }

    /// A connection speaks for one vehicle for its whole life.
    fn check_rebind(&self, connection_id: &ConnectionId, vehicle_id: &VehicleId) -> Result<(), RouteError> {
        match self.registry.vehicle_of(connection_id) {
            Some(current) if current != vehicle_id => Err(RouteError::validation(format!(
                "connection already registered as {current}"
            ))),
            _ => Ok(()),
        }
    }

    fn complete_registration(&mut self, connection_id: &ConnectionId, payload: RegisterPayload) {
        let now = Utc::now();
        let vehicle_id = payload.vehicle_id.clone();
        let driver_name = payload.display_name();
        let previous = self.registry.get(&vehicle_id);

        let connected_at = previous
            .filter(|p| p.connection_id == *connection_id)
            .map_or(now, |p| p.connected_at);
        // The vehicle did not move just because it reconnected.
        let location = previous.and_then(|p| p.location);

        let session = VehicleSession {
            vehicle_id: vehicle_id.clone(),
            connection_id: connection_id.clone(),
            driver_name: driver_name.clone(),
            vehicle_info: payload.vehicle_info.clone(),
            connected_at,
            last_heartbeat: Instant::now(),
            location,
        };

        if let Some(displaced) = self.registry.bind(session) {
            info!(vehicle_id = %vehicle_id, old_connection = %displaced, "session replaced");
            self.send_error(&displaced, &RouteError::SessionReplaced);
        }

        self.send_to(
            connection_id,
            &OutboundEvent::Registered(RegisteredData {
                vehicle_id: vehicle_id.clone(),
                driver_name: driver_name.clone(),
                connection_id: connection_id.clone(),
                server_time: now_ms(),
            }),
        );

        self.broadcast(
            &OutboundEvent::PresenceUpdate(PresenceData {
                vehicle_id: vehicle_id.clone(),
                driver_name: driver_name.clone(),
                vehicle_info: payload.vehicle_info.clone(),
                status: PresenceStatus::Online,
                reason: None,
                timestamp: now_ms(),
            }),
            Some(&vehicle_id),
        );

        self.persist(Record::VehicleOnline(VehicleSnapshot {
            vehicle_id: vehicle_id.clone(),
            driver_name,
            vehicle_info: payload.vehicle_info,
            seen_at: now,
        }));

        info!(vehicle_id = %vehicle_id, connection_id = %connection_id, "vehicle registered");
    }

    pub(super) fn on_heartbeat(&mut self, connection_id: &ConnectionId, vehicle_id: &VehicleId) {
        if let Some(session) = self.registry.get_mut(vehicle_id) {
            session.last_heartbeat = Instant::now();
        }
        self.send_to(connection_id, &OutboundEvent::HeartbeatAck(TimestampData::now()));
    }

    pub(super) fn on_disconnected(&mut self, connection_id: &ConnectionId) {
        match self.registry.vehicle_of(connection_id).cloned() {
            Some(vehicle_id) => self.end_session(&vehicle_id, "disconnect"),
            None => debug!(connection_id = %connection_id, "unregistered connection closed"),
        }
    }

    /// Drop every trace of the vehicle from routing state and tell the others.
    fn end_session(&mut self, vehicle_id: &VehicleId, reason: &str) {
        let Some(session) = self.registry.unbind_vehicle(vehicle_id) else {
            return;
        };
        self.index.remove(vehicle_id);
        self.coalescer.forget(vehicle_id);
        self.limiter.forget(vehicle_id);
        self.proximity.forget(vehicle_id);
        if let Some(timer) = self.flush_timers.remove(vehicle_id) {
            timer.abort();
        }
        self.end_calls_for(vehicle_id, reason);

        self.broadcast(
            &OutboundEvent::PresenceUpdate(PresenceData {
                vehicle_id: vehicle_id.clone(),
                driver_name: session.driver_name,
                vehicle_info: session.vehicle_info,
                status: PresenceStatus::Offline,
                reason: Some(reason.to_owned()),
                timestamp: now_ms(),
            }),
            None,
        );

        self.persist(Record::VehicleOffline {
            vehicle_id: vehicle_id.clone(),
            reason: reason.to_owned(),
            at: Utc::now(),
        });

        info!(vehicle_id = %vehicle_id, reason, "vehicle offline");
    }

    /// Expire silent sessions and prune signaling state.
    pub(super) fn sweep(&mut self, now: Instant, wall: DateTime<Utc>) {
        for vehicle_id in self.registry.stale(self.config.heartbeat_timeout, now) {
            if let Some(conn) = self.registry.connection_of(&vehicle_id) {
                self.connections.close(conn, CLOSE_STALE, "stale");
            }
            warn!(vehicle_id = %vehicle_id, "heartbeat timeout");
            self.end_session(&vehicle_id, "stale");
        }

        if let Some(ttl) = self.config.consent_ttl {
            let expired = self.consents.prune(ttl, wall);
            if expired > 0 {
                debug!(expired, "pruned connect requests");
            }
        }
        if let Some(timeout) = self.config.ring_timeout {
            self.expire_ringing_calls(timeout, wall);
        }
        let pruned = self.calls.prune_ended(self.config.call_retention, wall);
        if pruned > 0 {
            debug!(pruned, "pruned ended calls");
        }
    }
}
