pub mod calls;
pub mod coalesce;
pub mod errors;
pub mod geo;
pub mod ids;
pub mod protocol;
pub mod proximity;
pub mod rate_limit;
pub mod spatial;

pub use errors::RouteError;
pub use geo::GeoPoint;
pub use ids::{CallId, ConnectionId, MessageId, VehicleId};
pub use protocol::{InboundEvent, InboundKind, OutboundEvent};
pub use spatial::SpatialIndex;
