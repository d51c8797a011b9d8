//! Registered vehicle sessions, indexed by vehicle and by connection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use vicinity_core::{ConnectionId, GeoPoint, VehicleId};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Located {
    pub point: GeoPoint,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct VehicleSession {
    pub vehicle_id: VehicleId,
    pub connection_id: ConnectionId,
    pub driver_name: String,
    pub vehicle_info: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: Instant,
    pub location: Option<Located>,
}

/// At most one session per vehicle and one vehicle per connection.
#[derive(Default)]
pub struct Registry {
    sessions: HashMap<VehicleId, VehicleSession>,
    by_connection: HashMap<ConnectionId, VehicleId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session for `session.vehicle_id`. Returns the
    /// connection that previously owned the vehicle, if it was a different one.
    pub fn bind(&mut self, session: VehicleSession) -> Option<ConnectionId> {
        let displaced = self
            .sessions
            .get(&session.vehicle_id)
            .map(|old| old.connection_id.clone())
            .filter(|old| *old != session.connection_id);
        if let Some(old) = &displaced {
            self.by_connection.remove(old);
        }
        self.by_connection
            .insert(session.connection_id.clone(), session.vehicle_id.clone());
        self.sessions.insert(session.vehicle_id.clone(), session);
        displaced
    }

    /// Remove whatever session the connection owns.
    pub fn unbind_connection(&mut self, connection_id: &ConnectionId) -> Option<VehicleSession> {
        let vehicle_id = self.by_connection.remove(connection_id)?;
        self.sessions.remove(&vehicle_id)
    }

    pub fn unbind_vehicle(&mut self, vehicle_id: &VehicleId) -> Option<VehicleSession> {
        let session = self.sessions.remove(vehicle_id)?;
        self.by_connection.remove(&session.connection_id);
        Some(session)
    }

    pub fn vehicle_of(&self, connection_id: &ConnectionId) -> Option<&VehicleId> {
        self.by_connection.get(connection_id)
    }

    pub fn connection_of(&self, vehicle_id: &VehicleId) -> Option<&ConnectionId> {
        self.sessions.get(vehicle_id).map(|s| &s.connection_id)
    }

    pub fn get(&self, vehicle_id: &VehicleId) -> Option<&VehicleSession> {
        self.sessions.get(vehicle_id)
    }

    pub fn get_mut(&mut self, vehicle_id: &VehicleId) -> Option<&mut VehicleSession> {
        self.sessions.get_mut(vehicle_id)
    }

    pub fn position_of(&self, vehicle_id: &VehicleId) -> Option<GeoPoint> {
        self.sessions.get(vehicle_id)?.location.map(|l| l.point)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VehicleSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Vehicles whose last heartbeat is older than `timeout`, sorted.
    pub fn stale(&self, timeout: Duration, now: Instant) -> Vec<VehicleId> {
        let mut stale: Vec<VehicleId> = self
            .sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_heartbeat) > timeout)
            .map(|s| s.vehicle_id.clone())
            .collect();
        stale.sort();
        stale
    }
}
