//! Per-(vehicle, event class) token buckets.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::ids::VehicleId;

/// Classes that share a bucket.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    LocationUpdate,
    SendMessage,
    Signaling,
    EmergencyAlert,
}

impl EventClass {
    pub const ALL: [EventClass; 4] = [
        Self::LocationUpdate,
        Self::SendMessage,
        Self::Signaling,
        Self::EmergencyAlert,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::LocationUpdate => "location_update",
            Self::SendMessage => "send_message",
            Self::Signaling => "signaling",
            Self::EmergencyAlert => "emergency_alert",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketConfig {
    pub capacity: u32,
    pub interval: Duration,
}

impl BucketConfig {
    pub const fn new(capacity: u32, interval_ms: u64) -> Self {
        Self {
            capacity,
            interval: Duration::from_millis(interval_ms),
        }
    }
}

/// Bucket sizes per class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub location_update: BucketConfig,
    pub send_message: BucketConfig,
    pub signaling: BucketConfig,
    pub emergency_alert: BucketConfig,
}

impl RateLimitConfig {
    pub fn for_class(&self, class: EventClass) -> BucketConfig {
        match class {
            EventClass::LocationUpdate => self.location_update,
            EventClass::SendMessage => self.send_message,
            EventClass::Signaling => self.signaling,
            EventClass::EmergencyAlert => self.emergency_alert,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            location_update: BucketConfig::new(5, 1_000),
            send_message: BucketConfig::new(3, 1_000),
            signaling: BucketConfig::new(2, 1_000),
            emergency_alert: BucketConfig::new(1, 10_000),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: HashMap<(VehicleId, EventClass), Bucket>,
    denied_total: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: HashMap::new(),
            denied_total: 0,
        }
    }

    /// Consume one token. On denial returns the time until the next refill.
    pub fn allow(
        &mut self,
        vehicle_id: &VehicleId,
        class: EventClass,
        now: Instant,
    ) -> Result<(), Duration> {
        let cfg = self.config.for_class(class);
        let bucket = self
            .buckets
            .entry((vehicle_id.clone(), class))
            .or_insert(Bucket {
                tokens: cfg.capacity,
                last_refill: now,
            });

        refill(bucket, cfg, now);

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            return Ok(());
        }

        self.denied_total += 1;
        let since = now.saturating_duration_since(bucket.last_refill);
        Err(cfg.interval.saturating_sub(since))
    }

    /// Drop every bucket of a vehicle.
    pub fn forget(&mut self, vehicle_id: &VehicleId) {
        self.buckets.retain(|(id, _), _| id != vehicle_id);
    }

    /// Tokens currently available, after refilling up to `now`.
    pub fn available(&mut self, vehicle_id: &VehicleId, class: EventClass, now: Instant) -> u32 {
        let cfg = self.config.for_class(class);
        match self.buckets.get_mut(&(vehicle_id.clone(), class)) {
            Some(bucket) => {
                refill(bucket, cfg, now);
                bucket.tokens
            }
            None => cfg.capacity,
        }
    }

    pub fn denied_total(&self) -> u64 {
        self.denied_total
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

fn refill(bucket: &mut Bucket, cfg: BucketConfig, now: Instant) {
    if cfg.interval.is_zero() {
        bucket.tokens = cfg.capacity;
        bucket.last_refill = now;
        return;
    }

    let elapsed = now.saturating_duration_since(bucket.last_refill);
    let intervals = elapsed.as_nanos() / cfg.interval.as_nanos();
    if intervals == 0 {
        return;
    }

    let added = u128::from(cfg.capacity).saturating_mul(intervals);
    let total = u128::from(bucket.tokens).saturating_add(added);
    bucket.tokens = total.min(u128::from(cfg.capacity)) as u32;

    // Keep the partial interval so the next refill lands on the boundary.
    let remainder = elapsed.as_nanos() % cfg.interval.as_nanos();
    bucket.last_refill = now - Duration::from_nanos(remainder as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vid(s: &str) -> VehicleId {
        VehicleId::from_raw(s)
    }

    #[test]
    fn exactly_capacity_per_window() {
        let mut limiter = RateLimiter::new(RateLimitConfig::default());
        let v = vid("v1");
        let t0 = Instant::now();

        for _ in 0..3 {
            assert!(limiter.allow(&v, EventClass::SendMessage, t0).is_ok());
        }
        assert!(limiter.allow(&v, EventClass::SendMessage, t0).is_err());
        assert_eq!(limiter.denied_total(), 1);
    }

    #[test]
    fn refills_after_interval_without_exceeding() {
        let mut limiter = RateLimiter::new(RateLimitConfig::default());
        let v = vid("v1");
        let t0 = Instant::now();

        for _ in 0..5 {
            limiter.allow(&v, EventClass::LocationUpdate, t0).unwrap();
        }
        assert!(limiter.allow(&v, EventClass::LocationUpdate, t0).is_err());

        let t1 = t0 + Duration::from_millis(1_000);
        assert_eq!(limiter.available(&v, EventClass::LocationUpdate, t1), 5);

        // Long idle periods still cap at capacity.
        let t2 = t0 + Duration::from_secs(3_600);
        assert_eq!(limiter.available(&v, EventClass::LocationUpdate, t2), 5);
    }

    #[test]
    fn retry_hint_counts_down_to_next_refill() {
        let mut limiter = RateLimiter::new(RateLimitConfig::default());
        let v = vid("v1");
        let t0 = Instant::now();

        limiter.allow(&v, EventClass::EmergencyAlert, t0).unwrap();
        let hint = limiter
            .allow(&v, EventClass::EmergencyAlert, t0 + Duration::from_millis(2_500))
            .unwrap_err();
        assert_eq!(hint, Duration::from_millis(7_500));
    }

    #[test]
    fn partial_interval_progress_is_kept() {
        let mut limiter = RateLimiter::new(RateLimitConfig::default());
        let v = vid("v1");
        let t0 = Instant::now();

        for _ in 0..2 {
            limiter.allow(&v, EventClass::Signaling, t0).unwrap();
        }
        // 1.5 intervals later: one refill, half an interval carried over.
        let t1 = t0 + Duration::from_millis(1_500);
        limiter.allow(&v, EventClass::Signaling, t1).unwrap();
        limiter.allow(&v, EventClass::Signaling, t1).unwrap();
        let hint = limiter.allow(&v, EventClass::Signaling, t1).unwrap_err();
        assert_eq!(hint, Duration::from_millis(500));

        let t2 = t0 + Duration::from_millis(2_000);
        assert!(limiter.allow(&v, EventClass::Signaling, t2).is_ok());
    }

    #[test]
    fn classes_and_vehicles_are_independent() {
        let mut limiter = RateLimiter::new(RateLimitConfig::default());
        let t0 = Instant::now();

        limiter.allow(&vid("a"), EventClass::EmergencyAlert, t0).unwrap();
        assert!(limiter.allow(&vid("a"), EventClass::EmergencyAlert, t0).is_err());
        assert!(limiter.allow(&vid("b"), EventClass::EmergencyAlert, t0).is_ok());
        assert!(limiter.allow(&vid("a"), EventClass::SendMessage, t0).is_ok());
    }

    #[test]
    fn forget_drops_all_buckets_of_vehicle() {
        let mut limiter = RateLimiter::new(RateLimitConfig::default());
        let t0 = Instant::now();
        for class in EventClass::ALL {
            limiter.allow(&vid("a"), class, t0).unwrap();
        }
        limiter.allow(&vid("b"), EventClass::Signaling, t0).unwrap();
        assert_eq!(limiter.bucket_count(), 5);

        limiter.forget(&vid("a"));
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn class_names() {
        assert_eq!(EventClass::Signaling.name(), "signaling");
        assert_eq!(
            serde_json::to_string(&EventClass::EmergencyAlert).unwrap(),
            "\"emergency_alert\""
        );
    }
}
