pub mod database;
pub mod error;
pub mod events;
pub mod messages;
pub mod records;
pub mod schema;
pub mod store;
pub mod vehicles;

pub use database::Database;
pub use error::StoreError;
pub use records::{EventRecord, MessageRecord, Record, VehicleSnapshot};
pub use store::{SqliteStore, Store};
