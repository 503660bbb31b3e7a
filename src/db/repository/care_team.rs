use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{enum_col, opt_uuid_col, uuid_col, DatabaseError};
use crate::models::enums::{ProviderRole, QueueStatus, RecordStatus};
use crate::models::{CareTeamAssignment, QueueItem};

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<CareTeamAssignment> {
    Ok(CareTeamAssignment {
        seq: row.get(0)?,
        case_id: uuid_col(row, 1)?,
        provider_id: uuid_col(row, 2)?,
        role: enum_col(row, 3)?,
        status: enum_col(row, 4)?,
        assigned_at: row.get(5)?,
    })
}

/// Append one assignment row. Rows are never updated.
pub fn append_assignment(
    conn: &Connection,
    case_id: Uuid,
    provider_id: Uuid,
    role: ProviderRole,
    status: RecordStatus,
    at: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO care_team_assignments (case_id, provider_id, role, status, assigned_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![case_id.to_string(), provider_id.to_string(), role.as_str(), status.as_str(), at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Latest row per (provider, role) of a case whose status is active.
pub fn active_assignments(
    conn: &Connection,
    case_id: Uuid,
) -> Result<Vec<CareTeamAssignment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT a.seq, a.case_id, a.provider_id, a.role, a.status, a.assigned_at
         FROM care_team_assignments a
         WHERE a.case_id = ?1
           AND a.seq = (SELECT MAX(b.seq) FROM care_team_assignments b
                        WHERE b.case_id = a.case_id AND b.provider_id = a.provider_id AND b.role = a.role)
           AND a.status = 'active'
         ORDER BY a.seq",
    )?;
    let rows = stmt.query_map(params![case_id.to_string()], assignment_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Full assignment history of a case, oldest first.
pub fn assignment_history(
    conn: &Connection,
    case_id: Uuid,
) -> Result<Vec<CareTeamAssignment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT seq, case_id, provider_id, role, status, assigned_at
         FROM care_team_assignments WHERE case_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![case_id.to_string()], assignment_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn active_provider(
    conn: &Connection,
    case_id: Uuid,
    role: ProviderRole,
) -> Result<Option<Uuid>, DatabaseError> {
    Ok(active_assignments(conn, case_id)?
        .into_iter()
        .rev()
        .find(|a| a.role == role)
        .map(|a| a.provider_id))
}

pub fn has_active_assignment(
    conn: &Connection,
    case_id: Uuid,
    provider_id: Uuid,
    role: ProviderRole,
) -> Result<bool, DatabaseError> {
    Ok(active_assignments(conn, case_id)?
        .iter()
        .any(|a| a.provider_id == provider_id && a.role == role))
}

// ── Unclaimed queue ─────────────────────────────────────────

fn queue_from_row(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        case_id: uuid_col(row, 0)?,
        visit_id: uuid_col(row, 1)?,
        pathway_tag: row.get(2)?,
        status: enum_col(row, 3)?,
        claimed_by: opt_uuid_col(row, 4)?,
        updated_at: row.get(5)?,
    })
}

/// Put a case (back) on the queue for the given visit.
pub fn enqueue_case(
    conn: &Connection,
    case_id: Uuid,
    visit_id: Uuid,
    pathway_tag: &str,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO unclaimed_queue (case_id, visit_id, pathway_tag, status, claimed_by, updated_at)
         VALUES (?1, ?2, ?3, 'unclaimed', NULL, ?4)
         ON CONFLICT (case_id) DO UPDATE SET visit_id = excluded.visit_id,
             status = 'unclaimed', claimed_by = NULL, updated_at = excluded.updated_at",
        params![case_id.to_string(), visit_id.to_string(), pathway_tag, at],
    )?;
    Ok(())
}

pub fn get_queue_item(conn: &Connection, case_id: Uuid) -> Result<Option<QueueItem>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT case_id, visit_id, pathway_tag, status, claimed_by, updated_at
             FROM unclaimed_queue WHERE case_id = ?1",
            params![case_id.to_string()],
            queue_from_row,
        )
        .optional()?)
}

pub fn set_queue_status(
    conn: &Connection,
    case_id: Uuid,
    status: QueueStatus,
    claimed_by: Option<Uuid>,
    at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE unclaimed_queue SET status = ?2, claimed_by = ?3, updated_at = ?4 WHERE case_id = ?1",
        params![case_id.to_string(), status.as_str(), claimed_by.map(|id| id.to_string()), at],
    )?;
    Ok(changed == 1)
}

/// Unclaimed items in the given pathways, oldest first.
pub fn unclaimed_items(
    conn: &Connection,
    pathway_tags: &[String],
) -> Result<Vec<QueueItem>, DatabaseError> {
    let tags_json = serde_json::to_string(pathway_tags)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
    let mut stmt = conn.prepare(
        "SELECT case_id, visit_id, pathway_tag, status, claimed_by, updated_at
         FROM unclaimed_queue
         WHERE status = 'unclaimed' AND pathway_tag IN (SELECT value FROM json_each(?1))
         ORDER BY updated_at, rowid",
    )?;
    let rows = stmt.query_map(params![tags_json], queue_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
