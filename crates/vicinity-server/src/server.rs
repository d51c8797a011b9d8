//! Axum HTTP + WebSocket server and startup wiring.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use vicinity_core::VehicleId;
use vicinity_radio::{BoxedTransport, Frame, RadioLink};
use vicinity_store::Store;

use crate::auth::{AllowAll, TokenVerifier};
use crate::config::{HubConfig, ServerConfig};
use crate::connection::ConnectionTable;
use crate::fanout::Fanout;
use crate::hub::{spawn_hub, HubCommand, HubDeps, HubHandle, HubStats, RadioBridge, VehicleView};
use crate::persist::PersistQueue;
use crate::session::{run_ws_session, SessionContext};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub connections: Arc<ConnectionTable>,
    pub config: Arc<ServerConfig>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub start_time: Instant,
}

impl AppState {
    fn session_context(&self) -> SessionContext {
        SessionContext {
            hub: self.hub.clone(),
            connections: Arc::clone(&self.connections),
            ping_interval: self.config.ping_interval,
            pong_timeout: self.config.pong_timeout,
            shutdown: self.shutdown.token(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let ws_path = state.config.ws_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/vehicles", get(vehicles_handler))
        .route("/vehicles/{id}", get(vehicle_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    #[serde(flatten)]
    pub stats: HubStats,
}

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(id) => (StatusCode::NOT_FOUND, format!("vehicle {id} not found")),
            Self::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down".into()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return ApiError::Unavailable.into_response();
    }
    let ctx = state.session_context();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, ctx))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let stats = state.hub.stats().await.ok_or(ApiError::Unavailable)?;
    Ok(Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        stats,
    }))
}

/// GET /vehicles
async fn vehicles_handler(State(state): State<AppState>) -> Result<Json<Vec<VehicleView>>, ApiError> {
    state.hub.vehicles().await.map(Json).ok_or(ApiError::Unavailable)
}

/// GET /vehicles/{id}
async fn vehicle_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VehicleView>, ApiError> {
    state
        .hub
        .vehicle(VehicleId::from_raw(id.clone()))
        .await
        .ok_or(ApiError::Unavailable)?
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Optional collaborators wired into the hub at startup.
pub struct Collaborators {
    pub store: Option<Arc<dyn Store>>,
    pub store_queue: usize,
    pub verifier: Arc<dyn TokenVerifier>,
    pub fanout: Fanout,
    pub radio: Option<BoxedTransport>,
    pub radio_queue: usize,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            store: None,
            store_queue: 1024,
            verifier: Arc::new(AllowAll),
            fanout: Fanout::local_only(),
            radio: None,
            radio_queue: 64,
        }
    }
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    hub: HubHandle,
    coordinator: Arc<ShutdownCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.coordinator.token()
    }

    /// Cancel every background task and wait for them to finish.
    pub async fn shutdown(self) {
        self.coordinator.shutdown();
        self.coordinator.graceful_shutdown(self.tasks, None).await;
    }
}

/// Bind the listener, start the hub and its background tasks, then serve.
pub async fn start(
    config: ServerConfig,
    hub_config: HubConfig,
    collaborators: Collaborators,
) -> Result<ServerHandle, ServerError> {
    let addr = format!("{}:{}", config.host, config.port);
    let bind_err = |source| ServerError::Bind {
        addr: addr.clone(),
        source,
    };
    let listener = TcpListener::bind(&addr).await.map_err(bind_err)?;
    let local_addr = listener.local_addr().map_err(bind_err)?;

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let cancel = coordinator.token();
    let mut tasks = Vec::new();

    let connections = Arc::new(ConnectionTable::new(config.max_send_queue));

    let persist = collaborators.store.map(|store| {
        let (queue, worker) = PersistQueue::spawn(store, collaborators.store_queue, cancel.clone());
        tasks.push(worker);
        queue
    });

    let (radio, radio_frames) = match collaborators.radio {
        Some(transport) => {
            let spawned = RadioLink::spawn(transport, collaborators.radio_queue, cancel.clone());
            tasks.extend(spawned.tasks);
            (Some(RadioBridge::new(spawned.link)), Some(spawned.frames))
        }
        None => (None, None),
    };

    let fanout = collaborators.fanout;
    let sweep_interval = hub_config.sweep_interval;
    let proximity_interval = hub_config.broadcast_interval;
    let deps = HubDeps {
        connections: Arc::clone(&connections),
        verifier: collaborators.verifier,
        fanout: fanout.clone(),
        persist,
        radio,
    };
    let (hub, hub_task) = spawn_hub(hub_config, deps, config.hub_queue_size, cancel.clone());
    tasks.push(hub_task);

    tasks.extend(spawn_ticker(hub.clone(), sweep_interval, cancel.clone(), || HubCommand::StaleSweep));
    tasks.extend(spawn_ticker(hub.clone(), proximity_interval, cancel.clone(), || {
        HubCommand::ProximityTick
    }));
    if let Some(frames) = radio_frames {
        tasks.push(tokio::spawn(forward_radio_frames(frames, hub.clone(), cancel.clone())));
    }
    tasks.extend(fanout.spawn_subscriber(hub.clone(), cancel.clone()));

    let ws_path = config.ws_path.clone();
    let state = AppState {
        hub: hub.clone(),
        connections,
        config: Arc::new(config),
        shutdown: Arc::clone(&coordinator),
        start_time: Instant::now(),
    };
    let app = build_router(state);
    let serve_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "http server failed");
        }
    }));

    info!(addr = %local_addr, ws_path = %ws_path, "vicinity server listening");
    Ok(ServerHandle {
        addr: local_addr,
        hub,
        coordinator,
        tasks,
    })
}

/// Send `make()` to the hub every `period`. A zero period disables the tick.
fn spawn_ticker(
    hub: HubHandle,
    period: Duration,
    cancel: CancellationToken,
    make: fn() -> HubCommand,
) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let _ = interval.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if !hub.send(make()).await {
                        break;
                    }
                }
            }
        }
    }))
}

async fn forward_radio_frames(mut frames: mpsc::Receiver<Frame>, hub: HubHandle, cancel: CancellationToken) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else {
            info!("radio link closed");
            break;
        };
        if !hub.send(HubCommand::RadioFrame(frame)).await {
            break;
        }
    }
}
