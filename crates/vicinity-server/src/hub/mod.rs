//! The routing hub.
//!
//! One task owns every piece of mutable routing state: the session registry,
//! spatial index, coalescer, rate limiter, proximity sets, calls and consent.
//! Sessions, timers, the radio reader, the fanout subscriber and HTTP
//! handlers talk to it through [`HubCommand`]s, so handlers never lock.

mod location;
mod messaging;
mod presence;
mod radio;
mod registry;
mod router;
mod signaling;
mod views;

pub use radio::RadioBridge;
pub use registry::{Located, Registry, VehicleSession};
pub use views::{HubStats, VehicleView};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use vicinity_core::calls::{CallBook, ConsentBook};
use vicinity_core::coalesce::Coalescer;
use vicinity_core::protocol::{PresenceStatus, RegisterPayload};
use vicinity_core::proximity::ProximityTracker;
use vicinity_core::rate_limit::RateLimiter;
use vicinity_core::{ConnectionId, GeoPoint, OutboundEvent, RouteError, SpatialIndex, VehicleId};
use vicinity_radio::Frame;
use vicinity_store::{EventRecord, Record};

use crate::auth::TokenVerifier;
use crate::config::HubConfig;
use crate::connection::{ConnectionTable, CLOSE_AUTH_FAILED};
use crate::fanout::{Envelope, Fanout, FanoutTarget};
use crate::persist::PersistQueue;

pub enum HubCommand {
    Connected {
        connection_id: ConnectionId,
    },
    Inbound {
        connection_id: ConnectionId,
        text: String,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
    /// A coalescing timer fired.
    FlushLocation {
        vehicle_id: VehicleId,
    },
    StaleSweep,
    ProximityTick,
    AuthVerdict {
        connection_id: ConnectionId,
        payload: RegisterPayload,
        verdict: Result<(), String>,
    },
    RadioFrame(Frame),
    Remote(Envelope),
    Query(HubQuery),
}

pub enum HubQuery {
    Stats(oneshot::Sender<HubStats>),
    Vehicles(oneshot::Sender<Vec<VehicleView>>),
    Vehicle(VehicleId, oneshot::Sender<Option<VehicleView>>),
}

/// Cloneable sender side of the hub.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Returns `false` once the hub has stopped.
    pub async fn send(&self, command: HubCommand) -> bool {
        self.tx.send(command).await.is_ok()
    }

    pub async fn stats(&self) -> Option<HubStats> {
        self.query(HubQuery::Stats).await
    }

    pub async fn vehicles(&self) -> Option<Vec<VehicleView>> {
        self.query(HubQuery::Vehicles).await
    }

    pub async fn vehicle(&self, vehicle_id: VehicleId) -> Option<Option<VehicleView>> {
        self.query(|tx| HubQuery::Vehicle(vehicle_id, tx)).await
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> HubQuery) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if !self.send(HubCommand::Query(make(tx))).await {
            return None;
        }
        rx.await.ok()
    }
}

/// Collaborators the hub writes to.
pub struct HubDeps {
    pub connections: Arc<ConnectionTable>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub fanout: Fanout,
    pub persist: Option<PersistQueue>,
    pub radio: Option<RadioBridge>,
}

/// Where a directed event ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reach {
    Local,
    Relayed,
    Unreachable,
}

pub struct Hub {
    config: HubConfig,
    connections: Arc<ConnectionTable>,
    verifier: Arc<dyn TokenVerifier>,
    fanout: Fanout,
    persist: Option<PersistQueue>,
    radio: Option<RadioBridge>,
    registry: Registry,
    index: SpatialIndex,
    coalescer: Coalescer<GeoPoint>,
    limiter: RateLimiter,
    proximity: ProximityTracker,
    calls: CallBook,
    consents: ConsentBook,
    flush_timers: HashMap<VehicleId, JoinHandle<()>>,
    /// Vehicles other nodes announced online, with the announcing node.
    remote: HashMap<VehicleId, String>,
    self_tx: mpsc::WeakSender<HubCommand>,
}

/// Start the hub task.
pub fn spawn_hub(
    config: HubConfig,
    deps: HubDeps,
    queue_size: usize,
    cancel: CancellationToken,
) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_size.max(1));
    let hub = Hub::new(config, deps, tx.downgrade());
    let handle = tokio::spawn(hub.run(rx, cancel));
    (HubHandle { tx }, handle)
}

impl Hub {
    fn new(config: HubConfig, deps: HubDeps, self_tx: mpsc::WeakSender<HubCommand>) -> Self {
        Self {
            index: SpatialIndex::new(config.geohash_precision, config.linear_scan_threshold),
            coalescer: Coalescer::new(config.min_update_interval),
            limiter: RateLimiter::new(config.rate_limits.clone()),
            connections: deps.connections,
            verifier: deps.verifier,
            fanout: deps.fanout,
            persist: deps.persist,
            radio: deps.radio,
            registry: Registry::new(),
            proximity: ProximityTracker::new(),
            calls: CallBook::new(),
            consents: ConsentBook::new(),
            flush_timers: HashMap::new(),
            remote: HashMap::new(),
            self_tx,
            config,
        }
    }

    #[instrument(skip_all, name = "hub")]
    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>, cancel: CancellationToken) {
        info!(
            radius_m = self.config.radius_m,
            fanout = self.fanout.is_enabled(),
            radio = self.radio.is_some(),
            "hub started"
        );
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        for (_, timer) in self.flush_timers.drain() {
            timer.abort();
        }
        info!(vehicles = self.registry.len(), "hub stopped");
    }

    pub fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connected { connection_id } => self.on_connected(&connection_id),
            HubCommand::Inbound {
                connection_id,
                text,
            } => self.on_inbound(&connection_id, &text),
            HubCommand::Disconnected { connection_id } => self.on_disconnected(&connection_id),
            HubCommand::FlushLocation { vehicle_id } => self.on_flush(&vehicle_id),
            HubCommand::StaleSweep => self.sweep(std::time::Instant::now(), Utc::now()),
            HubCommand::ProximityTick => self.proximity_pass(),
            HubCommand::AuthVerdict {
                connection_id,
                payload,
                verdict,
            } => self.on_auth_verdict(&connection_id, payload, verdict),
            HubCommand::RadioFrame(frame) => self.on_radio_frame(&frame),
            HubCommand::Remote(envelope) => self.on_remote(envelope),
            HubCommand::Query(query) => self.answer(query),
        }
    }

    // ── Outbound helpers ────────────────────────────────────────────────────

    fn send_to(&self, connection_id: &ConnectionId, event: &OutboundEvent) -> bool {
        self.connections
            .send(connection_id, Arc::from(event.to_json()))
    }

    fn send_error(&self, connection_id: &ConnectionId, err: &RouteError) {
        debug!(connection_id = %connection_id, code = err.code(), error = %err, "route error");
        self.send_to(connection_id, &OutboundEvent::error(err));
        if err.closes_connection() {
            self.connections
                .close(connection_id, CLOSE_AUTH_FAILED, "auth_failed");
        }
    }

    /// Local delivery only.
    fn send_to_vehicle(&self, vehicle_id: &VehicleId, event: &OutboundEvent) -> bool {
        self.registry
            .connection_of(vehicle_id)
            .is_some_and(|conn| self.send_to(conn, event))
    }

    /// Local session first, then the node that announced the vehicle.
    fn deliver(&self, vehicle_id: &VehicleId, event: &OutboundEvent) -> Reach {
        let json = event.to_json();
        if let Some(conn) = self.registry.connection_of(vehicle_id) {
            return if self.connections.send(conn, Arc::from(json)) {
                Reach::Local
            } else {
                Reach::Unreachable
            };
        }
        if self.remote.contains_key(vehicle_id)
            && self
                .fanout
                .publish(FanoutTarget::Vehicle(vehicle_id.clone()), &json)
        {
            Reach::Relayed
        } else {
            Reach::Unreachable
        }
    }

    fn relay(&self, target: &VehicleId, event: &OutboundEvent) -> Result<Reach, RouteError> {
        match self.deliver(target, event) {
            Reach::Unreachable => Err(RouteError::TargetOffline(target.to_string())),
            reach => Ok(reach),
        }
    }

    /// Whether a directed event to `vehicle_id` could go anywhere.
    fn is_reachable(&self, vehicle_id: &VehicleId) -> bool {
        self.registry.get(vehicle_id).is_some() || self.remote.contains_key(vehicle_id)
    }

    /// Every registered session except `except`, plus the fanout channel.
    fn broadcast(&self, event: &OutboundEvent, except: Option<&VehicleId>) {
        let json = event.to_json();
        self.broadcast_local(Arc::from(json.as_str()), except);
        self.fanout.publish(FanoutTarget::All, &json);
    }

    fn broadcast_local(&self, json: Arc<str>, except: Option<&VehicleId>) -> usize {
        let mut sent = 0;
        for session in self.registry.iter() {
            if Some(&session.vehicle_id) == except {
                continue;
            }
            if self
                .connections
                .send(&session.connection_id, Arc::clone(&json))
            {
                sent += 1;
            }
        }
        sent
    }

    fn persist(&self, record: Record) {
        if let Some(queue) = &self.persist {
            queue.submit(record);
        }
    }

    fn record_event(&self, kind: &str, vehicle_id: Option<&VehicleId>, payload: Value) {
        self.persist(Record::Event(EventRecord {
            kind: kind.to_owned(),
            vehicle_id: vehicle_id.cloned(),
            payload,
            created_at: Utc::now(),
        }));
    }

    // ── Fanout ──────────────────────────────────────────────────────────────

    fn on_remote(&mut self, envelope: Envelope) {
        if self.fanout.is_own(&envelope) {
            return;
        }
        if envelope.target == FanoutTarget::All {
            self.track_remote(&envelope);
        }
        let payload: Arc<str> = Arc::from(envelope.payload);
        match envelope.target {
            FanoutTarget::All => {
                let sent = self.broadcast_local(payload, None);
                debug!(origin = %envelope.origin, sent, "remote broadcast delivered");
            }
            FanoutTarget::Vehicle(vehicle_id) => {
                if let Some(conn) = self.registry.connection_of(&vehicle_id) {
                    self.connections.send(conn, payload);
                }
            }
        }
    }

    /// Follow presence broadcasts from other nodes. A vehicle stays known
    /// until the node that announced it reports it offline.
    fn track_remote(&mut self, envelope: &Envelope) {
        let Ok(OutboundEvent::PresenceUpdate(presence)) =
            serde_json::from_str::<OutboundEvent>(&envelope.payload)
        else {
            return;
        };
        match presence.status {
            PresenceStatus::Online => {
                if self.registry.get(&presence.vehicle_id).is_none() {
                    self.remote
                        .insert(presence.vehicle_id, envelope.origin.clone());
                }
            }
            PresenceStatus::Offline => {
                if self.remote.get(&presence.vehicle_id) == Some(&envelope.origin) {
                    self.remote.remove(&presence.vehicle_id);
                }
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    fn answer(&self, query: HubQuery) {
        match query {
            HubQuery::Stats(tx) => {
                let _ = tx.send(self.stats());
            }
            HubQuery::Vehicles(tx) => {
                let mut views: Vec<VehicleView> =
                    self.registry.iter().map(|s| self.view_of(s)).collect();
                views.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
                let _ = tx.send(views);
            }
            HubQuery::Vehicle(vehicle_id, tx) => {
                let _ = tx.send(self.registry.get(&vehicle_id).map(|s| self.view_of(s)));
            }
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            vehicles: self.registry.len(),
            located: self.index.len(),
            live_calls: self.calls.live_count(),
            pending_consents: self.consents.len(),
            coalesced_total: self.coalescer.coalesced_total(),
            rate_limited_total: self.limiter.denied_total(),
            dropped_sends_total: self.connections.dropped_total(),
            persist_dropped_total: self.persist.as_ref().map_or(0, PersistQueue::dropped),
            fanout_enabled: self.fanout.is_enabled(),
            remote_vehicles: self.remote.len(),
            radio: self.radio.as_ref().map(|r| r.link().stats()),
        }
    }

    fn view_of(&self, session: &VehicleSession) -> VehicleView {
        VehicleView {
            vehicle_id: session.vehicle_id.clone(),
            driver_name: session.driver_name.clone(),
            vehicle_info: session.vehicle_info.clone(),
            lat: session.location.map(|l| l.point.lat),
            lon: session.location.map(|l| l.point.lon),
            geohash: self.index.geohash_of(&session.vehicle_id).map(str::to_owned),
            location_updated_at: session.location.map(|l| l.updated_at),
            connected_at: session.connected_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::time::Duration;
    use crate::auth::AllowAll;
    use crate::connection::{ConnectionReceiver, Outgoing};

    /// A hub driven synchronously through [`Hub::handle`].
    pub struct Harness {
        pub hub: Hub,
        pub connections: Arc<ConnectionTable>,
        // Keeps the hub's weak self-sender upgradeable.
        pub tx: mpsc::Sender<HubCommand>,
        pub rx: mpsc::Receiver<HubCommand>,
    }

    pub struct Client {
        pub id: ConnectionId,
        pub out: ConnectionReceiver,
        close_code: Option<u16>,
    }

    impl Client {
        /// Every queued text frame, parsed. A queued close is remembered.
        pub fn drain(&mut self) -> Vec<Value> {
            let mut frames = Vec::new();
            while let Ok(item) = self.out.rx.try_recv() {
                match item {
                    Outgoing::Text(text) => frames.push(serde_json::from_str(&text).unwrap()),
                    Outgoing::Close { code, .. } => self.close_code = Some(code),
                }
            }
            frames
        }

        /// Queued frames with the given event name.
        pub fn events(&mut self, name: &str) -> Vec<Value> {
            self.drain()
                .into_iter()
                .filter(|f| f["event"] == name)
                .map(|f| f["data"].clone())
                .collect()
        }

        pub fn closed_with(&mut self) -> Option<u16> {
            self.drain();
            self.close_code
        }
    }

    impl Harness {
        pub fn new(config: HubConfig) -> Self {
            Self::with_deps(config, |deps| deps)
        }

        pub fn with_deps(config: HubConfig, customize: impl FnOnce(HubDeps) -> HubDeps) -> Self {
            let connections = Arc::new(ConnectionTable::new(256));
            let deps = customize(HubDeps {
                connections: Arc::clone(&connections),
                verifier: Arc::new(AllowAll),
                fanout: Fanout::local_only(),
                persist: None,
                radio: None,
            });
            let (tx, rx) = mpsc::channel(64);
            let hub = Hub::new(config, deps, tx.downgrade());
            Self {
                hub,
                connections,
                tx,
                rx,
            }
        }

        pub fn connect(&mut self) -> Client {
            let (id, out) = self.connections.register();
            self.hub.handle(HubCommand::Connected {
                connection_id: id.clone(),
            });
            let mut client = Client {
                id,
                out,
                close_code: None,
            };
            client.drain();
            client
        }

        pub fn send(&mut self, client: &Client, frame: Value) {
            self.hub.handle(HubCommand::Inbound {
                connection_id: client.id.clone(),
                text: frame.to_string(),
            });
        }

        /// Connect and register `vehicle`, discarding the setup traffic.
        pub fn register(&mut self, vehicle: &str) -> Client {
            let mut client = self.connect();
            self.send(
                &client,
                serde_json::json!({"event": "register", "data": {"vehicleId": vehicle, "driverName": vehicle}}),
            );
            client.drain();
            client
        }

        pub fn locate(&mut self, client: &Client, vehicle: &str, lat: f64, lon: f64) {
            self.send(
                client,
                serde_json::json!({"event": "location_update", "data": {"vehicleId": vehicle, "lat": lat, "lon": lon}}),
            );
        }

        pub fn disconnect(&mut self, client: &Client) {
            self.connections.remove(&client.id);
            self.hub.handle(HubCommand::Disconnected {
                connection_id: client.id.clone(),
            });
        }
    }

    /// Generous limits and no coalescing, so tests only see what they provoke.
    pub fn relaxed_config() -> HubConfig {
        let mut config = HubConfig {
            min_update_interval: Duration::ZERO,
            ..HubConfig::default()
        };
        let wide = vicinity_core::rate_limit::BucketConfig::new(1_000, 1_000);
        config.rate_limits.location_update = wide;
        config.rate_limits.send_message = wide;
        config.rate_limits.signaling = wide;
        config.rate_limits.emergency_alert = wide;
        config
    }
}
