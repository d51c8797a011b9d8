pub mod decoder;
pub mod error;
pub mod frame;
pub mod link;
pub mod short_id;

pub use decoder::{Decoder, DecoderStats};
pub use error::{FrameError, LinkError};
pub use frame::{Frame, FrameType, BROADCAST_ID};
pub use link::{open, BoxedTransport, LinkStats, RadioLink, SpawnedLink};
pub use short_id::ShortIdRegistry;
