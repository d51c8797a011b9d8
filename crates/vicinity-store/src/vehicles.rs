use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::instrument;

use vicinity_core::VehicleId;

use crate::database::Database;
use crate::error::StoreError;
use crate::records::{VehicleRow, VehicleSnapshot};

const COLUMNS: &str = "vehicle_id, driver_name, vehicle_info, online, last_lat, last_lon, \
                       first_seen_at, last_seen_at, offline_reason";

pub struct VehicleRepo {
    db: Database,
}

impl VehicleRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or refresh a vehicle and mark it online.
    #[instrument(skip(self, snapshot), fields(vehicle_id = %snapshot.vehicle_id))]
    pub fn upsert_online(&self, snapshot: &VehicleSnapshot) -> Result<(), StoreError> {
        let at = snapshot.seen_at.to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO vehicles (vehicle_id, driver_name, vehicle_info, online, first_seen_at, last_seen_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)
                 ON CONFLICT(vehicle_id) DO UPDATE SET
                    driver_name = excluded.driver_name,
                    vehicle_info = excluded.vehicle_info,
                    online = 1,
                    last_seen_at = excluded.last_seen_at,
                    offline_reason = NULL",
                params![
                    snapshot.vehicle_id.as_str(),
                    snapshot.driver_name,
                    snapshot.vehicle_info,
                    at
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(vehicle_id = %vehicle_id))]
    pub fn mark_offline(&self, vehicle_id: &VehicleId, reason: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE vehicles SET online = 0, offline_reason = ?2, last_seen_at = ?3 WHERE vehicle_id = ?1",
                params![vehicle_id.as_str(), reason, at.to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("vehicle {vehicle_id}")));
            }
            Ok(())
        })
    }

    pub fn record_location(
        &self,
        vehicle_id: &VehicleId,
        lat: f64,
        lon: f64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE vehicles SET last_lat = ?2, last_lon = ?3, last_seen_at = ?4 WHERE vehicle_id = ?1",
                params![vehicle_id.as_str(), lat, lon, at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, vehicle_id: &VehicleId) -> Result<VehicleRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM vehicles WHERE vehicle_id = ?1"),
                [vehicle_id.as_str()],
                map_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("vehicle {vehicle_id}")))
        })
    }

    pub fn list(&self) -> Result<Vec<VehicleRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM vehicles ORDER BY vehicle_id"))?;
            let rows = stmt
                .query_map([], map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark every vehicle offline. Used at startup since in-memory sessions
    /// do not survive a restart.
    pub fn reset_online(&self, at: DateTime<Utc>) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE vehicles SET online = 0, offline_reason = 'restart', last_seen_at = ?1 WHERE online = 1",
                [at.to_rfc3339()],
            )?;
            Ok(changed)
        })
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<VehicleRow> {
    Ok(VehicleRow {
        vehicle_id: VehicleId::from_raw(row.get::<_, String>(0)?),
        driver_name: row.get(1)?,
        vehicle_info: row.get(2)?,
        online: row.get::<_, i64>(3)? != 0,
        last_lat: row.get(4)?,
        last_lon: row.get(5)?,
        first_seen_at: row.get(6)?,
        last_seen_at: row.get(7)?,
        offline_reason: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> VehicleRepo {
        VehicleRepo::new(Database::in_memory().unwrap())
    }

    fn snapshot(id: &str, name: &str) -> VehicleSnapshot {
        VehicleSnapshot {
            vehicle_id: VehicleId::from_raw(id),
            driver_name: name.into(),
            vehicle_info: Some("sedan".into()),
            seen_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_then_get() {
        let repo = repo();
        repo.upsert_online(&snapshot("v1", "Asha")).unwrap();
        let row = repo.get(&VehicleId::from_raw("v1")).unwrap();
        assert_eq!(row.driver_name, "Asha");
        assert!(row.online);
        assert_eq!(row.vehicle_info.as_deref(), Some("sedan"));
    }

    #[test]
    fn upsert_refreshes_and_keeps_first_seen() {
        let repo = repo();
        repo.upsert_online(&snapshot("v1", "Asha")).unwrap();
        let first = repo.get(&VehicleId::from_raw("v1")).unwrap().first_seen_at;

        let mut later = snapshot("v1", "Ravi");
        later.seen_at = Utc::now() + chrono::Duration::seconds(5);
        repo.upsert_online(&later).unwrap();

        let row = repo.get(&VehicleId::from_raw("v1")).unwrap();
        assert_eq!(row.driver_name, "Ravi");
        assert_eq!(row.first_seen_at, first);
        assert_ne!(row.last_seen_at, first);
    }

    #[test]
    fn offline_and_location() {
        let repo = repo();
        let id = VehicleId::from_raw("v1");
        repo.upsert_online(&snapshot("v1", "Asha")).unwrap();
        repo.record_location(&id, 12.97, 77.59, Utc::now()).unwrap();
        repo.mark_offline(&id, "stale", Utc::now()).unwrap();

        let row = repo.get(&id).unwrap();
        assert!(!row.online);
        assert_eq!(row.offline_reason.as_deref(), Some("stale"));
        assert_eq!(row.last_lat, Some(12.97));
    }

    #[test]
    fn missing_vehicle() {
        let repo = repo();
        let id = VehicleId::from_raw("ghost");
        assert!(matches!(repo.get(&id), Err(StoreError::NotFound(_))));
        assert!(matches!(repo.mark_offline(&id, "x", Utc::now()), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn reset_marks_all_offline() {
        let repo = repo();
        repo.upsert_online(&snapshot("a", "A")).unwrap();
        repo.upsert_online(&snapshot("b", "B")).unwrap();
        assert_eq!(repo.reset_online(Utc::now()).unwrap(), 2);
        assert!(repo.list().unwrap().iter().all(|r| !r.online));
    }
}
