//! Location pipeline: coalesce, index, recompute nearby sets, notify.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::trace;
use vicinity_core::coalesce::Admission;
use vicinity_core::protocol::{
    now_ms, LocationPayload, NearbyData, NearbyEntry, PeerLocationData, ProximityData,
};
use vicinity_core::{GeoPoint, OutboundEvent, RouteError, VehicleId};
use vicinity_store::Record;

use super::registry::Located;
use super::{Hub, HubCommand};

impl Hub {
    pub(super) fn on_location(
        &mut self,
        vehicle_id: &VehicleId,
        payload: &LocationPayload,
    ) -> Result<(), RouteError> {
        let point = payload.point()?;
        match self.coalescer.submit(vehicle_id, point, Instant::now()) {
            Admission::Process(point) => {
                self.cancel_flush(vehicle_id);
                self.process_location(vehicle_id, point);
            }
            Admission::Deferred { delay, replaced } => {
                trace!(vehicle_id = %vehicle_id, replaced, "location coalesced");
                self.arm_flush(vehicle_id, delay);
            }
        }
        Ok(())
    }

    pub(super) fn on_flush(&mut self, vehicle_id: &VehicleId) {
        self.flush_timers.remove(vehicle_id);
        if self.registry.get(vehicle_id).is_none() {
            return;
        }
        if let Some(point) = self.coalescer.flush(vehicle_id, Instant::now()) {
            self.process_location(vehicle_id, point);
        }
    }

    /// One timer per vehicle; re-arming replaces the previous one.
    fn arm_flush(&mut self, vehicle_id: &VehicleId, delay: Duration) {
        self.cancel_flush(vehicle_id);
        let hub = self.self_tx.clone();
        let target = vehicle_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = hub.upgrade() {
                let _ = tx.send(HubCommand::FlushLocation { vehicle_id: target }).await;
            }
        });
        self.flush_timers.insert(vehicle_id.clone(), timer);
    }

    fn cancel_flush(&mut self, vehicle_id: &VehicleId) {
        if let Some(timer) = self.flush_timers.remove(vehicle_id) {
            timer.abort();
        }
    }

    fn process_location(&mut self, vehicle_id: &VehicleId, point: GeoPoint) {
        let now = Utc::now();
        let Some(session) = self.registry.get_mut(vehicle_id) else {
            return;
        };
        session.location = Some(Located {
            point,
            updated_at: now,
        });
        let relocation = self.index.relocate(vehicle_id, point);
        trace!(vehicle_id = %vehicle_id, geohash = relocation.hash(), "location processed");

        self.refresh_proximity(vehicle_id, true);

        self.persist(Record::VehicleLocation {
            vehicle_id: vehicle_id.clone(),
            lat: point.lat,
            lon: point.lon,
            at: now,
        });
    }

    /// Recompute the vehicle's nearby set and send `nearby_vehicles` plus any
    /// enter/exit transitions. With `notify_peers`, every neighbor also gets a
    /// `peer_location` for the vehicle.
    fn refresh_proximity(&mut self, vehicle_id: &VehicleId, notify_peers: bool) {
        let Some(origin) = self.registry.position_of(vehicle_id) else {
            return;
        };
        let registry = &self.registry;
        let neighbors = self.index.query(vehicle_id, origin, self.config.radius_m, |id| {
            registry.position_of(id)
        });

        let vehicles: Vec<NearbyEntry> = neighbors
            .iter()
            .filter_map(|n| {
                let peer = registry.get(&n.vehicle_id)?;
                Some(NearbyEntry {
                    vehicle_id: n.vehicle_id.clone(),
                    driver_name: peer.driver_name.clone(),
                    vehicle_info: peer.vehicle_info.clone(),
                    lat: n.point.lat,
                    lon: n.point.lon,
                    distance_m: n.distance_m,
                })
            })
            .collect();

        let changes = self.proximity.update(vehicle_id, &neighbors, |peer| {
            registry.position_of(peer).map(|p| origin.distance_m(&p))
        });

        self.send_to_vehicle(
            vehicle_id,
            &OutboundEvent::NearbyVehicles(NearbyData {
                vehicles,
                radius: self.config.radius_m,
            }),
        );

        let timestamp = now_ms();
        for change in changes {
            self.send_to_vehicle(
                vehicle_id,
                &OutboundEvent::ProximityEvent(ProximityData {
                    event_type: change.transition,
                    peer_vehicle_id: change.peer,
                    distance_m: change.distance_m,
                    timestamp,
                }),
            );
        }

        if notify_peers {
            for neighbor in &neighbors {
                self.send_to_vehicle(
                    &neighbor.vehicle_id,
                    &OutboundEvent::PeerLocation(PeerLocationData {
                        vehicle_id: vehicle_id.clone(),
                        lat: origin.lat,
                        lon: origin.lon,
                        distance_m: neighbor.distance_m,
                        timestamp,
                    }),
                );
            }
        }
    }

    /// Periodic pass so vehicles that stop reporting still see peers come
    /// and go.
    pub(super) fn proximity_pass(&mut self) {
        let located: Vec<VehicleId> = self.index.vehicle_ids().cloned().collect();
        for vehicle_id in &located {
            self.refresh_proximity(vehicle_id, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use vicinity_core::VehicleId;

    use super::super::test_support::{relaxed_config, Client, Harness};
    use super::super::HubCommand;

    // ~60 m apart along a meridian.
    const A: (f64, f64) = (52.520000, 13.405000);
    const B: (f64, f64) = (52.520540, 13.405000);
    // ~5.5 km away.
    const FAR: (f64, f64) = (52.570000, 13.405000);

    fn proximity(client: &mut Client) -> Vec<Value> {
        client.events("proximity_event")
    }

    #[test]
    fn two_vehicles_sixty_meters_apart() {
        let mut h = Harness::new(relaxed_config());
        let mut a = h.register("car-a");
        let mut b = h.register("car-b");
        a.drain();

        h.locate(&a, "car-a", A.0, A.1);
        let nearby = a.events("nearby_vehicles");
        assert_eq!(nearby[0]["vehicles"], json!([]));
        assert_eq!(nearby[0]["radius"], 500.0);

        h.locate(&b, "car-b", B.0, B.1);
        let frames = b.drain();
        let nearby: Vec<&Value> = frames.iter().filter(|f| f["event"] == "nearby_vehicles").collect();
        let entry = &nearby[0]["data"]["vehicles"][0];
        assert_eq!(entry["vehicleId"], "car-a");
        assert_eq!(entry["driverName"], "car-a");
        let d = entry["distanceM"].as_f64().unwrap();
        assert!((d - 60.0).abs() < 1.0, "distance {d}");

        let enters: Vec<&Value> = frames.iter().filter(|f| f["event"] == "proximity_event").collect();
        assert_eq!(enters.len(), 1);
        assert_eq!(enters[0]["data"]["eventType"], "enter");
        assert_eq!(enters[0]["data"]["peerVehicleId"], "car-a");

        let peer = a.events("peer_location");
        assert_eq!(peer.len(), 1);
        assert_eq!(peer[0]["vehicleId"], "car-b");
        assert!((peer[0]["distanceM"].as_f64().unwrap() - 60.0).abs() < 1.0);
    }

    #[test]
    fn moving_away_emits_exit_once() {
        let mut h = Harness::new(relaxed_config());
        let mut a = h.register("car-a");
        let mut b = h.register("car-b");
        h.locate(&a, "car-a", A.0, A.1);
        h.locate(&b, "car-b", B.0, B.1);
        b.drain();

        h.locate(&b, "car-b", FAR.0, FAR.1);
        let events = proximity(&mut b);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["eventType"], "exit");
        assert_eq!(events[0]["peerVehicleId"], "car-a");
        assert!(events[0]["distanceM"].as_f64().unwrap() > 5_000.0);

        h.locate(&b, "car-b", FAR.0, FAR.1);
        assert!(proximity(&mut b).is_empty());
        let _ = a.drain();
    }

    #[test]
    fn departed_peer_exits_without_distance() {
        let mut h = Harness::new(relaxed_config());
        let a = h.register("car-a");
        let mut b = h.register("car-b");
        h.locate(&a, "car-a", A.0, A.1);
        h.locate(&b, "car-b", B.0, B.1);
        b.drain();

        h.disconnect(&a);
        h.hub.handle(HubCommand::ProximityTick);
        let events = proximity(&mut b);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["eventType"], "exit");
        assert!(events[0].get("distanceM").is_none());
    }

    #[test]
    fn periodic_pass_reports_without_peer_locations() {
        let mut h = Harness::new(relaxed_config());
        let mut a = h.register("car-a");
        let mut b = h.register("car-b");
        h.locate(&a, "car-a", A.0, A.1);
        h.locate(&b, "car-b", B.0, B.1);
        a.drain();
        b.drain();

        h.hub.handle(HubCommand::ProximityTick);
        assert_eq!(a.events("nearby_vehicles").len(), 1);
        let frames = b.drain();
        assert!(frames.iter().any(|f| f["event"] == "nearby_vehicles"));
        assert!(!frames.iter().any(|f| f["event"] == "peer_location"));
    }

    #[test]
    fn location_is_indexed() {
        let mut h = Harness::new(relaxed_config());
        let a = h.register("car-a");
        h.locate(&a, "car-a", A.0, A.1);
        let id = VehicleId::from_raw("car-a");
        assert!(h.hub.index.contains(&id));
        assert_eq!(h.hub.index.geohash_of(&id).map(str::len), Some(6));
        assert_eq!(h.hub.stats().located, 1);
    }

    #[test]
    fn out_of_range_coordinates_rejected() {
        let mut h = Harness::new(relaxed_config());
        let mut a = h.register("car-a");
        h.locate(&a, "car-a", 91.0, 0.0);
        assert_eq!(a.events("error")[0]["code"], "validation_error");
        assert!(!h.hub.index.contains(&VehicleId::from_raw("car-a")));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_updates_coalesce_to_latest() {
        let mut config = relaxed_config();
        config.min_update_interval = Duration::from_millis(150);
        let mut h = Harness::new(config);
        let mut a = h.register("car-a");

        h.locate(&a, "car-a", 52.0, 13.0);
        h.locate(&a, "car-a", 52.1, 13.0);
        h.locate(&a, "car-a", 52.2, 13.0);
        assert_eq!(a.events("nearby_vehicles").len(), 1);
        assert_eq!(h.hub.stats().coalesced_total, 2);
        assert_eq!(h.hub.flush_timers.len(), 1);

        tokio::time::advance(Duration::from_millis(200)).await;
        let flush = h.rx.recv().await.unwrap();
        assert!(matches!(flush, HubCommand::FlushLocation { .. }));
        h.hub.handle(flush);

        assert_eq!(a.events("nearby_vehicles").len(), 1);
        let position = h.hub.registry.position_of(&VehicleId::from_raw("car-a")).unwrap();
        assert_eq!(position.lat, 52.2);
        assert!(h.hub.flush_timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_flush() {
        let mut config = relaxed_config();
        config.min_update_interval = Duration::from_millis(150);
        let mut h = Harness::new(config);
        let a = h.register("car-a");
        h.locate(&a, "car-a", 52.0, 13.0);
        h.locate(&a, "car-a", 52.1, 13.0);
        assert_eq!(h.hub.flush_timers.len(), 1);

        h.disconnect(&a);
        assert!(h.hub.flush_timers.is_empty());
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(h.rx.try_recv().is_err());
    }
}
