//! Diffing of successive nearby-vehicle sets into enter/exit transitions.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ids::VehicleId;
use crate::spatial::Neighbor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Enter,
    Exit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProximityChange {
    pub transition: Transition,
    pub peer: VehicleId,
    /// Current distance on enter; `None` on exit when the peer has no position.
    pub distance_m: Option<f64>,
}

/// Last computed nearby set per vehicle.
#[derive(Debug, Default)]
pub struct ProximityTracker {
    previous: HashMap<VehicleId, HashSet<VehicleId>>,
}

impl ProximityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `nearby` as the current set for `vehicle_id` and return what
    /// changed since the last call. `distance_to` resolves exit distances.
    ///
    /// Enters come first in `nearby` order, then exits sorted by id.
    pub fn update<F>(
        &mut self,
        vehicle_id: &VehicleId,
        nearby: &[Neighbor],
        distance_to: F,
    ) -> Vec<ProximityChange>
    where
        F: Fn(&VehicleId) -> Option<f64>,
    {
        let current: HashSet<VehicleId> = nearby.iter().map(|n| n.vehicle_id.clone()).collect();
        let previous = self.previous.remove(vehicle_id).unwrap_or_default();

        let mut changes: Vec<ProximityChange> = nearby
            .iter()
            .filter(|n| !previous.contains(&n.vehicle_id))
            .map(|n| ProximityChange {
                transition: Transition::Enter,
                peer: n.vehicle_id.clone(),
                distance_m: Some(n.distance_m),
            })
            .collect();

        let mut exits: Vec<&VehicleId> = previous.difference(&current).collect();
        exits.sort();
        changes.extend(exits.into_iter().map(|peer| ProximityChange {
            transition: Transition::Exit,
            peer: peer.clone(),
            distance_m: distance_to(peer),
        }));

        self.previous.insert(vehicle_id.clone(), current);
        changes
    }

    pub fn nearby_of(&self, vehicle_id: &VehicleId) -> Option<&HashSet<VehicleId>> {
        self.previous.get(vehicle_id)
    }

    /// Drop the vehicle's own set. Peers still holding it see an exit on
    /// their next update.
    pub fn forget(&mut self, vehicle_id: &VehicleId) {
        self.previous.remove(vehicle_id);
    }
}
