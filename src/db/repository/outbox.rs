use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::{enum_col, uuid_col, DatabaseError};
use crate::models::enums::DeliveryStatus;

/// Raw outbox row; the payload is decoded by the event layer.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub seq: i64,
    pub id: Uuid,
    pub event_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

pub fn insert_outbox_event(
    conn: &Connection,
    id: Uuid,
    event_type: &str,
    payload: &str,
    at: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO event_outbox (id, event_type, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id.to_string(), event_type, payload, at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Events the subscriber has neither received nor given up on, oldest first.
pub fn pending_for_subscriber(
    conn: &Connection,
    subscriber: &str,
    limit: usize,
) -> Result<Vec<OutboxRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT o.seq, o.id, o.event_type, o.payload, o.created_at
         FROM event_outbox o
         LEFT JOIN event_deliveries d ON d.event_id = o.id AND d.subscriber = ?1
         WHERE d.status IS NULL OR d.status = 'failed'
         ORDER BY o.seq LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![subscriber, limit as i64], |row| {
        Ok(OutboxRow {
            seq: row.get(0)?,
            id: uuid_col(row, 1)?,
            event_type: row.get(2)?,
            payload: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn delivery_attempts(conn: &Connection, event_id: Uuid, subscriber: &str) -> Result<u32, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT attempts FROM event_deliveries WHERE event_id = ?1 AND subscriber = ?2",
            params![event_id.to_string(), subscriber],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

pub fn record_delivery(
    conn: &Connection,
    event_id: Uuid,
    subscriber: &str,
    status: DeliveryStatus,
    error: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO event_deliveries (event_id, subscriber, status, attempts, last_error, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?5)
         ON CONFLICT (event_id, subscriber) DO UPDATE SET status = excluded.status,
             attempts = event_deliveries.attempts + 1, last_error = excluded.last_error,
             updated_at = excluded.updated_at",
        params![event_id.to_string(), subscriber, status.as_str(), error, at],
    )?;
    Ok(())
}

pub fn delivery_status(
    conn: &Connection,
    event_id: Uuid,
    subscriber: &str,
) -> Result<Option<DeliveryStatus>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT status FROM event_deliveries WHERE event_id = ?1 AND subscriber = ?2",
            params![event_id.to_string(), subscriber],
            |row| enum_col(row, 0),
        )
        .optional()?)
}

pub fn count_outbox(conn: &Connection) -> Result<i64, DatabaseError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM event_outbox", [], |row| row.get(0))?)
}
