use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{enum_col, opt_uuid_col, uuid_col, DatabaseError};
use crate::models::enums::VisitStatus;
use crate::models::PatientVisit;

const VISIT_COLUMNS: &str = "id, case_id, pathway_tag, status, sku_type, is_followup, parent_visit_id,
     intake_layout_id, review_layout_id, created_at, submitted_at, treated_at";

fn visit_from_row(row: &Row<'_>) -> rusqlite::Result<PatientVisit> {
    Ok(PatientVisit {
        id: uuid_col(row, 0)?,
        case_id: uuid_col(row, 1)?,
        pathway_tag: row.get(2)?,
        status: enum_col(row, 3)?,
        sku_type: row.get(4)?,
        is_followup: row.get(5)?,
        parent_visit_id: opt_uuid_col(row, 6)?,
        intake_layout_id: uuid_col(row, 7)?,
        review_layout_id: opt_uuid_col(row, 8)?,
        created_at: row.get(9)?,
        submitted_at: row.get(10)?,
        treated_at: row.get(11)?,
    })
}

pub fn insert_visit(conn: &Connection, visit: &PatientVisit) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO patient_visits ({VISIT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            visit.id.to_string(),
            visit.case_id.to_string(),
            visit.pathway_tag,
            visit.status.as_str(),
            visit.sku_type,
            visit.is_followup,
            visit.parent_visit_id.map(|id| id.to_string()),
            visit.intake_layout_id.to_string(),
            visit.review_layout_id.map(|id| id.to_string()),
            visit.created_at,
            visit.submitted_at,
            visit.treated_at,
        ],
    )?;
    Ok(())
}

pub fn get_visit(conn: &Connection, id: Uuid) -> Result<PatientVisit, DatabaseError> {
    conn.query_row(
        &format!("SELECT {VISIT_COLUMNS} FROM patient_visits WHERE id = ?1"),
        params![id.to_string()],
        visit_from_row,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("visit", id))
}

/// All visits of a case, oldest first.
pub fn visits_for_case(conn: &Connection, case_id: Uuid) -> Result<Vec<PatientVisit>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VISIT_COLUMNS} FROM patient_visits WHERE case_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let rows = stmt.query_map(params![case_id.to_string()], visit_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// The visit currently blocking a new one in the case, if any.
pub fn in_flight_visit(conn: &Connection, case_id: Uuid) -> Result<Option<PatientVisit>, DatabaseError> {
    Ok(visits_for_case(conn, case_id)?
        .into_iter()
        .find(|v| v.status.is_in_flight()))
}

/// Most recently treated visit of a case.
pub fn latest_treated_visit(
    conn: &Connection,
    case_id: Uuid,
) -> Result<Option<PatientVisit>, DatabaseError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {VISIT_COLUMNS} FROM patient_visits
                 WHERE case_id = ?1 AND status = ?2
                 ORDER BY treated_at DESC, rowid DESC LIMIT 1"
            ),
            params![case_id.to_string(), VisitStatus::Treated.as_str()],
            visit_from_row,
        )
        .optional()?)
}

/// Visit of a case in a given status, newest first.
pub fn visit_in_status(
    conn: &Connection,
    case_id: Uuid,
    status: VisitStatus,
) -> Result<Option<PatientVisit>, DatabaseError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {VISIT_COLUMNS} FROM patient_visits
                 WHERE case_id = ?1 AND status = ?2
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ),
            params![case_id.to_string(), status.as_str()],
            visit_from_row,
        )
        .optional()?)
}

/// Compare-and-set the visit status, stamping the matching timestamp.
/// Returns whether this call won.
pub fn cas_visit_status(
    conn: &Connection,
    id: Uuid,
    from: &[VisitStatus],
    to: VisitStatus,
    at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let allowed: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let allowed_json = serde_json::to_string(&allowed)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
    let stamp = match to {
        VisitStatus::Submitted => Some("submitted_at"),
        VisitStatus::Treated => Some("treated_at"),
        _ => None,
    };
    let changed = match stamp {
        Some(column) => conn.execute(
            &format!(
                "UPDATE patient_visits SET status = ?2, {column} = ?4
                 WHERE id = ?1 AND status IN (SELECT value FROM json_each(?3))"
            ),
            params![id.to_string(), to.as_str(), allowed_json, at],
        )?,
        None => conn.execute(
            "UPDATE patient_visits SET status = ?2
             WHERE id = ?1 AND status IN (SELECT value FROM json_each(?3))",
            params![id.to_string(), to.as_str(), allowed_json],
        )?,
    };
    Ok(changed == 1)
}

/// Other visits of the case that reached submission before `visit_id` did.
pub fn count_submitted_before(
    conn: &Connection,
    case_id: Uuid,
    visit_id: Uuid,
    submitted_at: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM patient_visits
         WHERE case_id = ?1 AND id != ?2 AND submitted_at IS NOT NULL AND submitted_at <= ?3",
        params![case_id.to_string(), visit_id.to_string(), submitted_at],
        |row| row.get(0),
    )?)
}
