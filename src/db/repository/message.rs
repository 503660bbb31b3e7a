use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{enum_col, json_col, to_json, uuid_col, DatabaseError};
use crate::models::enums::MessageStatus;
use crate::models::ScheduledMessage;

const MESSAGE_COLUMNS: &str = "id, event_type, case_id, person_id, scheduled_at, status,
     template_id, data, error, created_at, completed_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledMessage> {
    Ok(ScheduledMessage {
        id: uuid_col(row, 0)?,
        event_type: row.get(1)?,
        case_id: uuid_col(row, 2)?,
        person_id: uuid_col(row, 3)?,
        scheduled_at: row.get(4)?,
        status: enum_col(row, 5)?,
        template_id: row.get(6)?,
        data: json_col(row, 7)?,
        error: row.get(8)?,
        created_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

pub fn insert_message(conn: &Connection, msg: &ScheduledMessage) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO scheduled_messages ({MESSAGE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            msg.id.to_string(),
            msg.event_type,
            msg.case_id.to_string(),
            msg.person_id.to_string(),
            msg.scheduled_at,
            msg.status.as_str(),
            msg.template_id,
            to_json("scheduled_messages.data", &msg.data)?,
            msg.error,
            msg.created_at,
            msg.completed_at,
        ],
    )?;
    Ok(())
}

pub fn messages_for_case(conn: &Connection, case_id: Uuid) -> Result<Vec<ScheduledMessage>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages WHERE case_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let rows = stmt.query_map(params![case_id.to_string()], message_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_message(conn: &Connection, id: Uuid) -> Result<ScheduledMessage, DatabaseError> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM scheduled_messages WHERE id = ?1"),
        params![id.to_string()],
        message_from_row,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("scheduled_message", id))
}

/// Messages of one event type for a case in any of `statuses`.
pub fn count_messages(
    conn: &Connection,
    case_id: Uuid,
    event_type: &str,
    statuses: &[MessageStatus],
) -> Result<i64, DatabaseError> {
    let allowed: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    let allowed_json = serde_json::to_string(&allowed)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM scheduled_messages
         WHERE case_id = ?1 AND event_type = ?2 AND status IN (SELECT value FROM json_each(?3))",
        params![case_id.to_string(), event_type, allowed_json],
        |row| row.get(0),
    )?)
}

/// Scheduled messages whose time has come, oldest first.
pub fn due_messages(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<ScheduledMessage>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages
         WHERE status = 'scheduled' AND scheduled_at <= ?1
         ORDER BY scheduled_at, rowid LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![now, limit as i64], message_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Move a scheduled message to a final status. Returns whether it was still scheduled.
pub fn complete_message(
    conn: &Connection,
    id: Uuid,
    status: MessageStatus,
    error: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE scheduled_messages SET status = ?2, error = ?3, completed_at = ?4
         WHERE id = ?1 AND status = 'scheduled'",
        params![id.to_string(), status.as_str(), error, at],
    )?;
    Ok(changed == 1)
}

/// Deactivate every pending message of an event type for a case.
pub fn deactivate_messages(
    conn: &Connection,
    case_id: Uuid,
    event_type: &str,
    at: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE scheduled_messages SET status = 'deactivated', completed_at = ?3
         WHERE case_id = ?1 AND event_type = ?2 AND status = 'scheduled'",
        params![case_id.to_string(), event_type, at],
    )?)
}
