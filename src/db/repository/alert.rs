use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{opt_uuid_col, uuid_col, DatabaseError};
use crate::models::{Alert, CaseNote};

const ALERT_COLUMNS: &str =
    "id, case_id, visit_id, question_id, message, dismissable, created_at, dismissed_at";

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: uuid_col(row, 0)?,
        case_id: uuid_col(row, 1)?,
        visit_id: opt_uuid_col(row, 2)?,
        question_id: row.get(3)?,
        message: row.get(4)?,
        dismissable: row.get(5)?,
        created_at: row.get(6)?,
        dismissed_at: row.get(7)?,
    })
}

/// Insert unless the same message already exists for the case/visit.
pub fn insert_alert(conn: &Connection, alert: &Alert) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO alerts ({ALERT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            alert.id.to_string(),
            alert.case_id.to_string(),
            alert.visit_id.map(|id| id.to_string()),
            alert.question_id,
            alert.message,
            alert.dismissable,
            alert.created_at,
            alert.dismissed_at,
        ],
    )?;
    Ok(changed == 1)
}

pub fn alerts_for_case(conn: &Connection, case_id: Uuid) -> Result<Vec<Alert>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ALERT_COLUMNS} FROM alerts WHERE case_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let rows = stmt.query_map(params![case_id.to_string()], alert_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn alerts_for_visit(conn: &Connection, visit_id: Uuid) -> Result<Vec<Alert>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ALERT_COLUMNS} FROM alerts WHERE visit_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let rows = stmt.query_map(params![visit_id.to_string()], alert_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_alert(conn: &Connection, id: Uuid) -> Result<Alert, DatabaseError> {
    conn.query_row(
        &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
        params![id.to_string()],
        alert_from_row,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("alert", id))
}

pub fn dismiss_alert(conn: &Connection, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE alerts SET dismissed_at = ?2 WHERE id = ?1 AND dismissable = 1 AND dismissed_at IS NULL",
        params![id.to_string(), at],
    )?;
    Ok(changed == 1)
}

// ── Case notes ──────────────────────────────────────────────

pub fn insert_note(conn: &Connection, note: &CaseNote) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO case_notes (id, case_id, author_id, internal, text, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            note.id.to_string(),
            note.case_id.to_string(),
            note.author_id.map(|id| id.to_string()),
            note.internal,
            note.text,
            note.created_at,
        ],
    )?;
    Ok(())
}

pub fn notes_for_case(conn: &Connection, case_id: Uuid) -> Result<Vec<CaseNote>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, case_id, author_id, internal, text, created_at
         FROM case_notes WHERE case_id = ?1 ORDER BY created_at, rowid",
    )?;
    let rows = stmt.query_map(params![case_id.to_string()], |row| {
        Ok(CaseNote {
            id: uuid_col(row, 0)?,
            case_id: uuid_col(row, 1)?,
            author_id: opt_uuid_col(row, 2)?,
            internal: row.get(3)?,
            text: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
