//! Geohash bucket index over located vehicles.
//!
//! The index holds vehicle ids only. Positions are looked up through a
//! caller-supplied function at query time so the registry stays the single
//! owner of session state.

use std::collections::{HashMap, HashSet};

use crate::geo::{self, GeoPoint};
use crate::ids::VehicleId;

/// Population below which queries scan every indexed vehicle instead of
/// gathering from the 3×3 neighborhood.
pub const DEFAULT_LINEAR_SCAN_THRESHOLD: usize = 50;

/// A vehicle found within the query radius.
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbor {
    pub vehicle_id: VehicleId,
    pub point: GeoPoint,
    pub distance_m: f64,
}

/// Outcome of [`SpatialIndex::relocate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Relocation {
    /// The vehicle was not indexed before.
    Inserted { hash: String },
    /// The vehicle changed bucket.
    Moved { from: String, to: String },
    /// Same bucket as before; nothing changed.
    Unchanged { hash: String },
}

impl Relocation {
    pub fn hash(&self) -> &str {
        match self {
            Self::Inserted { hash } | Self::Unchanged { hash } => hash,
            Self::Moved { to, .. } => to,
        }
    }
}

pub struct SpatialIndex {
    precision: usize,
    linear_scan_threshold: usize,
    buckets: HashMap<String, HashSet<VehicleId>>,
    membership: HashMap<VehicleId, String>,
}

impl SpatialIndex {
    pub fn new(precision: usize, linear_scan_threshold: usize) -> Self {
        Self {
            precision: precision.max(1),
            linear_scan_threshold,
            buckets: HashMap::new(),
            membership: HashMap::new(),
        }
    }

    /// Insert a vehicle at `point`. An already-indexed vehicle is relocated.
    pub fn add(&mut self, vehicle_id: &VehicleId, point: GeoPoint) -> String {
        self.relocate(vehicle_id, point).hash().to_owned()
    }

    /// Move a vehicle to the bucket for `point`. No-op when the hash is unchanged.
    pub fn relocate(&mut self, vehicle_id: &VehicleId, point: GeoPoint) -> Relocation {
        let hash = geo::encode(point.lat, point.lon, self.precision);

        match self.membership.get(vehicle_id) {
            Some(current) if *current == hash => Relocation::Unchanged { hash },
            Some(current) => {
                let from = current.clone();
                self.detach(vehicle_id, &from);
                self.attach(vehicle_id, &hash);
                Relocation::Moved { from, to: hash }
            }
            None => {
                self.attach(vehicle_id, &hash);
                Relocation::Inserted { hash }
            }
        }
    }

    /// Remove a vehicle. Returns whether it was indexed.
    pub fn remove(&mut self, vehicle_id: &VehicleId) -> bool {
        match self.membership.remove(vehicle_id) {
            Some(hash) => {
                self.detach(vehicle_id, &hash);
                true
            }
            None => false,
        }
    }

    fn attach(&mut self, vehicle_id: &VehicleId, hash: &str) {
        self.buckets
            .entry(hash.to_owned())
            .or_default()
            .insert(vehicle_id.clone());
        self.membership.insert(vehicle_id.clone(), hash.to_owned());
    }

    fn detach(&mut self, vehicle_id: &VehicleId, hash: &str) {
        if let Some(bucket) = self.buckets.get_mut(hash) {
            bucket.remove(vehicle_id);
            if bucket.is_empty() {
                self.buckets.remove(hash);
            }
        }
    }

    pub fn contains(&self, vehicle_id: &VehicleId) -> bool {
        self.membership.contains_key(vehicle_id)
    }

    pub fn geohash_of(&self, vehicle_id: &VehicleId) -> Option<&str> {
        self.membership.get(vehicle_id).map(String::as_str)
    }

    /// Number of indexed vehicles.
    pub fn len(&self) -> usize {
        self.membership.len()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Ids of every indexed vehicle.
    pub fn vehicle_ids(&self) -> impl Iterator<Item = &VehicleId> {
        self.membership.keys()
    }

    /// Vehicles within `radius_m` of `origin`, excluding `origin_id`,
    /// ascending by haversine distance.
    ///
    /// Candidates whose position `position_of` cannot resolve are skipped.
    pub fn query<F>(
        &self,
        origin_id: &VehicleId,
        origin: GeoPoint,
        radius_m: f64,
        position_of: F,
    ) -> Vec<Neighbor>
    where
        F: Fn(&VehicleId) -> Option<GeoPoint>,
    {
        let mut found: Vec<Neighbor> = self
            .candidates(origin, radius_m)
            .into_iter()
            .filter(|id| *id != origin_id)
            .filter_map(|id| {
                let point = position_of(id)?;
                let distance_m = origin.distance_m(&point);
                (distance_m <= radius_m).then(|| Neighbor {
                    vehicle_id: id.clone(),
                    point,
                    distance_m,
                })
            })
            .collect();

        found.sort_by(|a, b| {
            a.distance_m
                .partial_cmp(&b.distance_m)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
        });
        found
    }

    fn candidates(&self, origin: GeoPoint, radius_m: f64) -> Vec<&VehicleId> {
        if self.membership.len() < self.linear_scan_threshold
            || !geo::neighborhood_covers(self.precision, origin.lat, radius_m)
        {
            return self.membership.keys().collect();
        }

        let hash = geo::encode(origin.lat, origin.lon, self.precision);
        match geo::neighbors(&hash) {
            Some(cells) => cells
                .iter()
                .filter_map(|cell| self.buckets.get(cell))
                .flat_map(|bucket| bucket.iter())
                .collect(),
            None => self.membership.keys().collect(),
        }
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(geo::DEFAULT_PRECISION, DEFAULT_LINEAR_SCAN_THRESHOLD)
    }
}
