//! Latest-value-wins coalescing of rapid per-vehicle updates.
//!
//! Pure state only. Whoever owns the coalescer arms a timer for the returned
//! delay and calls [`Coalescer::flush`] when it fires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ids::VehicleId;

/// Result of submitting an update.
#[derive(Clone, Debug, PartialEq)]
pub enum Admission<T> {
    /// Process now. Any pending value was discarded.
    Process(T),
    /// Stored as pending; process after `delay`.
    Deferred { delay: Duration, replaced: bool },
}

#[derive(Debug)]
struct Slot<T> {
    last_processed: Option<Instant>,
    pending: Option<T>,
}

#[derive(Debug)]
pub struct Coalescer<T> {
    min_interval: Duration,
    slots: HashMap<VehicleId, Slot<T>>,
    coalesced_total: u64,
}

impl<T> Coalescer<T> {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            slots: HashMap::new(),
            coalesced_total: 0,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn submit(&mut self, vehicle_id: &VehicleId, update: T, now: Instant) -> Admission<T> {
        let slot = self.slots.entry(vehicle_id.clone()).or_insert(Slot {
            last_processed: None,
            pending: None,
        });

        let elapsed = slot
            .last_processed
            .map(|last| now.saturating_duration_since(last));

        match elapsed {
            Some(elapsed) if elapsed < self.min_interval => {
                let replaced = slot.pending.replace(update).is_some();
                self.coalesced_total += 1;
                Admission::Deferred {
                    delay: self.min_interval - elapsed,
                    replaced,
                }
            }
            _ => {
                slot.pending = None;
                slot.last_processed = Some(now);
                Admission::Process(update)
            }
        }
    }

    /// Take the pending value, if any, and mark it processed at `now`.
    pub fn flush(&mut self, vehicle_id: &VehicleId, now: Instant) -> Option<T> {
        let slot = self.slots.get_mut(vehicle_id)?;
        let update = slot.pending.take()?;
        slot.last_processed = Some(now);
        Some(update)
    }

    pub fn has_pending(&self, vehicle_id: &VehicleId) -> bool {
        self.slots
            .get(vehicle_id)
            .is_some_and(|slot| slot.pending.is_some())
    }

    pub fn forget(&mut self, vehicle_id: &VehicleId) {
        self.slots.remove(vehicle_id);
    }

    /// Updates that were deferred instead of processed immediately.
    pub fn coalesced_total(&self) -> u64 {
        self.coalesced_total
    }
}
