use std::path::Path;

use chrono::Utc;
use tracing::info;

use crate::database::Database;
use crate::error::StoreError;
use crate::events::EventRepo;
use crate::messages::MessageRepo;
use crate::records::Record;
use crate::vehicles::VehicleRepo;

/// Durable sink for best-effort writes.
///
/// Calls are synchronous; callers run them off the async runtime.
pub trait Store: Send + Sync {
    fn write(&self, record: &Record) -> Result<(), StoreError>;
}

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    vehicles: VehicleRepo,
    messages: MessageRepo,
    events: EventRepo,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let store = Self::from_db(Database::open(path)?);
        let reset = store.vehicles.reset_online(Utc::now())?;
        if reset > 0 {
            info!(count = reset, "marked vehicles from previous run offline");
        }
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_db(Database::in_memory()?))
    }

    fn from_db(db: Database) -> Self {
        Self {
            vehicles: VehicleRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            events: EventRepo::new(db),
        }
    }

    pub fn vehicles(&self) -> &VehicleRepo {
        &self.vehicles
    }

    pub fn messages(&self) -> &MessageRepo {
        &self.messages
    }

    pub fn events(&self) -> &EventRepo {
        &self.events
    }
}

impl Store for SqliteStore {
    fn write(&self, record: &Record) -> Result<(), StoreError> {
        match record {
            Record::VehicleOnline(snapshot) => self.vehicles.upsert_online(snapshot),
            Record::VehicleOffline { vehicle_id, reason, at } => {
                self.vehicles.mark_offline(vehicle_id, reason, *at)
            }
            Record::VehicleLocation { vehicle_id, lat, lon, at } => {
                self.vehicles.record_location(vehicle_id, *lat, *lon, *at)
            }
            Record::Message(msg) => self.messages.insert(msg),
            Record::Event(event) => self.events.append(event).map(|_| ()),
        }
    }
}
