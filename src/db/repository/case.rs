use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{enum_col, uuid_col, DatabaseError};
use crate::models::enums::CaseStatus;
use crate::models::PatientCase;

const CASE_COLUMNS: &str = "id, patient_id, pathway_tag, status, claimed, created_at";

fn case_from_row(row: &Row<'_>) -> rusqlite::Result<PatientCase> {
    Ok(PatientCase {
        id: uuid_col(row, 0)?,
        patient_id: uuid_col(row, 1)?,
        pathway_tag: row.get(2)?,
        status: enum_col(row, 3)?,
        claimed: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn insert_case(conn: &Connection, case: &PatientCase) -> Result<(), DatabaseError> {
    conn.execute(
        &format!("INSERT INTO patient_cases ({CASE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![
            case.id.to_string(),
            case.patient_id.to_string(),
            case.pathway_tag,
            case.status.as_str(),
            case.claimed,
            case.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_case(conn: &Connection, id: Uuid) -> Result<PatientCase, DatabaseError> {
    conn.query_row(
        &format!("SELECT {CASE_COLUMNS} FROM patient_cases WHERE id = ?1"),
        params![id.to_string()],
        case_from_row,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("case", id))
}

pub fn cases_for_patient(conn: &Connection, patient_id: Uuid) -> Result<Vec<PatientCase>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CASE_COLUMNS} FROM patient_cases WHERE patient_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let rows = stmt.query_map(params![patient_id.to_string()], case_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Compare-and-set the case status. Returns whether this call won.
pub fn cas_case_status(
    conn: &Connection,
    id: Uuid,
    from: &[CaseStatus],
    to: CaseStatus,
) -> Result<bool, DatabaseError> {
    let allowed: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let allowed_json = serde_json::to_string(&allowed)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
    let changed = conn.execute(
        "UPDATE patient_cases SET status = ?2
         WHERE id = ?1 AND status IN (SELECT value FROM json_each(?3))",
        params![id.to_string(), to.as_str(), allowed_json],
    )?;
    Ok(changed == 1)
}

/// Flip the claimed flag from `expected` to `!expected`. Returns whether this call won.
pub fn cas_case_claimed(conn: &Connection, id: Uuid, expected: bool) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE patient_cases SET claimed = ?3 WHERE id = ?1 AND claimed = ?2",
        params![id.to_string(), expected, !expected],
    )?;
    Ok(changed == 1)
}

/// Mark a case claimed without a compare (direct assignment path).
pub fn set_case_claimed(conn: &Connection, id: Uuid, claimed: bool) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE patient_cases SET claimed = ?2 WHERE id = ?1",
        params![id.to_string(), claimed],
    )?;
    Ok(())
}

