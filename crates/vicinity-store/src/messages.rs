use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use rusqlite::types::Type;

use vicinity_core::{MessageId, VehicleId};

use crate::database::Database;
use crate::error::StoreError;
use crate::records::MessageRecord;

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, msg: &MessageRecord) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, content, message_type, status, sent_ts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    msg.id.as_str(),
                    msg.sender_id.as_str(),
                    msg.recipient_id.as_str(),
                    msg.content,
                    msg.message_type,
                    msg.status,
                    msg.sent_ts,
                    msg.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )?;
            Ok(())
        })
    }

    /// Messages sent or received by `vehicle_id`, newest first.
    pub fn for_vehicle(&self, vehicle_id: &VehicleId, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, recipient_id, content, message_type, status, sent_ts, created_at
                 FROM messages
                 WHERE sender_id = ?1 OR recipient_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![vehicle_id.as_str(), limit as i64], |row| {
                    Ok(MessageRecord {
                        id: MessageId::from_raw(row.get::<_, String>(0)?),
                        sender_id: VehicleId::from_raw(row.get::<_, String>(1)?),
                        recipient_id: VehicleId::from_raw(row.get::<_, String>(2)?),
                        content: row.get(3)?,
                        message_type: row.get(4)?,
                        status: row.get(5)?,
                        sent_ts: row.get(6)?,
                        created_at: parse_timestamp(&row.get::<_, String>(7)?, 7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }
}

fn parse_timestamp(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
