use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::{uuid_col, DatabaseError};
use crate::models::CaseTag;

fn tag_id(conn: &Connection, text: &str) -> Result<i64, DatabaseError> {
    conn.execute("INSERT OR IGNORE INTO tags (text) VALUES (?1)", params![text])?;
    Ok(conn.query_row("SELECT id FROM tags WHERE text = ?1", params![text], |row| row.get(0))?)
}

/// Attach a tag to a case. Idempotent: returns false if already attached.
pub fn add_case_tag(
    conn: &Connection,
    case_id: Uuid,
    text: &str,
    trigger_time: Option<DateTime<Utc>>,
    hidden: bool,
    at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let id = tag_id(conn, text)?;
    let changed = conn.execute(
        "INSERT OR IGNORE INTO case_tag_memberships (tag_id, case_id, trigger_time, hidden, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, case_id.to_string(), trigger_time, hidden, at],
    )?;
    Ok(changed == 1)
}

/// Detach a tag from a case. Returns false if it was not attached.
pub fn remove_case_tag(conn: &Connection, case_id: Uuid, text: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM case_tag_memberships
         WHERE case_id = ?1 AND tag_id = (SELECT id FROM tags WHERE text = ?2)",
        params![case_id.to_string(), text],
    )?;
    Ok(changed == 1)
}

pub fn tags_for_case(conn: &Connection, case_id: Uuid) -> Result<Vec<CaseTag>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT t.text, m.case_id, m.trigger_time, m.hidden
         FROM case_tag_memberships m JOIN tags t ON t.id = m.tag_id
         WHERE m.case_id = ?1 ORDER BY t.text",
    )?;
    let rows = stmt.query_map(params![case_id.to_string()], |row| {
        Ok(CaseTag {
            tag: row.get(0)?,
            case_id: uuid_col(row, 1)?,
            trigger_time: row.get(2)?,
            hidden: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn cases_with_tag(conn: &Connection, text: &str) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT m.case_id FROM case_tag_memberships m JOIN tags t ON t.id = m.tag_id
         WHERE t.text = ?1 ORDER BY m.created_at",
    )?;
    let rows = stmt.query_map(params![text], |row| uuid_col(row, 0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
