//! One-byte station ids for vehicles that appear on the radio link.
//!
//! Ids are allocated on first use and kept for the life of the process, so a
//! vehicle that reconnects is heard under the same id.

use std::collections::HashMap;

use vicinity_core::VehicleId;

use crate::error::LinkError;
use crate::frame::{BROADCAST_ID, UNASSIGNED_ID};

const FIRST_ID: u8 = UNASSIGNED_ID + 1;
const LAST_ID: u8 = BROADCAST_ID - 1;
pub const CAPACITY: usize = (LAST_ID - FIRST_ID) as usize + 1;

#[derive(Debug)]
pub struct ShortIdRegistry {
    by_short: HashMap<u8, VehicleId>,
    by_vehicle: HashMap<VehicleId, u8>,
    cursor: u8,
}

impl ShortIdRegistry {
    pub fn new() -> Self {
        Self {
            by_short: HashMap::new(),
            by_vehicle: HashMap::new(),
            cursor: FIRST_ID,
        }
    }

    /// Short id for `vehicle_id`, assigning the next free one if needed.
    pub fn allocate(&mut self, vehicle_id: &VehicleId) -> Result<u8, LinkError> {
        if let Some(&short) = self.by_vehicle.get(vehicle_id) {
            return Ok(short);
        }
        if self.by_short.len() >= CAPACITY {
            return Err(LinkError::ShortIdsExhausted(CAPACITY));
        }

        let mut candidate = self.cursor;
        while self.by_short.contains_key(&candidate) {
            candidate = if candidate == LAST_ID { FIRST_ID } else { candidate + 1 };
        }

        self.by_short.insert(candidate, vehicle_id.clone());
        self.by_vehicle.insert(vehicle_id.clone(), candidate);
        self.cursor = if candidate == LAST_ID { FIRST_ID } else { candidate + 1 };
        Ok(candidate)
    }

    pub fn short_of(&self, vehicle_id: &VehicleId) -> Option<u8> {
        self.by_vehicle.get(vehicle_id).copied()
    }

    pub fn resolve(&self, short: u8) -> Option<&VehicleId> {
        self.by_short.get(&short)
    }

    /// Vehicle id for a sender, or `radio:<id>` for stations never seen locally.
    pub fn sender_identity(&self, short: u8) -> VehicleId {
        self.resolve(short)
            .cloned()
            .unwrap_or_else(|| VehicleId::from_raw(format!("radio:{short}")))
    }

    pub fn len(&self) -> usize {
        self.by_short.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_short.is_empty()
    }
}

impl Default for ShortIdRegistry {
    fn default() -> Self {
        Self::new()
    }
}
