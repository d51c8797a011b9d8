//! # vicinity-server
//!
//! Axum HTTP + `WebSocket` server that routes vehicle presence, proximity,
//! messaging and call signaling.
//!
//! - `WebSocket` gateway: one reader and one writer task per connection
//! - Routing hub: a single task owning all presence and proximity state
//! - HTTP endpoints: health summary and vehicle lookups
//! - Optional collaborators: persistence queue, cross-process fanout, radio link
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod fanout;
pub mod hub;
pub mod persist;
pub mod server;
pub mod session;
pub mod shutdown;

pub use auth::{AllowAll, SharedSecretVerifier, TokenVerifier};
pub use config::{HubConfig, ServerConfig};
pub use fanout::{Fanout, FanoutChannel, InProcessChannel};
pub use hub::{HubHandle, HubStats, VehicleView};
pub use server::{build_router, start, AppState, Collaborators, ServerError, ServerHandle};
pub use shutdown::ShutdownCoordinator;
