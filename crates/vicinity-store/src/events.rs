use chrono::SecondsFormat;
use rusqlite::params;

use vicinity_core::VehicleId;

use crate::database::Database;
use crate::error::StoreError;
use crate::records::{EventRecord, EventRow};

/// Append-only log of notable happenings (emergencies, presence changes,
/// call lifecycle).
pub struct EventRepo {
    db: Database,
}

impl EventRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn append(&self, event: &EventRecord) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(&event.payload)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (kind, vehicle_id, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    event.kind,
                    event.vehicle_id.as_ref().map(VehicleId::as_str),
                    payload,
                    event.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent events, optionally filtered by kind, newest first.
    pub fn recent(&self, kind: Option<&str>, limit: usize) -> Result<Vec<EventRow>, StoreError> {
        let raw: Vec<(i64, String, Option<String>, String, String)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, vehicle_id, payload, created_at FROM events
                 WHERE (?1 IS NULL OR kind = ?1)
                 ORDER BY id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![kind, limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        raw.into_iter()
            .map(|(id, kind, vehicle_id, payload, created_at)| {
                Ok(EventRow {
                    id,
                    kind,
                    vehicle_id: vehicle_id.map(VehicleId::from_raw),
                    payload: serde_json::from_str(&payload)?,
                    created_at,
                })
            })
            .collect()
    }

    pub fn count(&self, kind: &str) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM events WHERE kind = ?1", [kind], |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        })
    }
}
