use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{opt_uuid_col, uuid_col, DatabaseError};
use crate::models::{DiagnosisCode, DiagnosisItem, DiagnosisSet};

const SET_COLUMNS: &str =
    "id, visit_id, doctor_id, notes, unsuitable, unsuitable_reason, active, created_at";

fn set_from_row(row: &Row<'_>) -> rusqlite::Result<DiagnosisSet> {
    Ok(DiagnosisSet {
        id: uuid_col(row, 0)?,
        visit_id: uuid_col(row, 1)?,
        doctor_id: uuid_col(row, 2)?,
        notes: row.get(3)?,
        unsuitable: row.get(4)?,
        unsuitable_reason: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Deactivate the visit's active set. Returns the deactivated set id.
pub fn deactivate_active_set(conn: &Connection, visit_id: Uuid) -> Result<Option<Uuid>, DatabaseError> {
    let current = active_set_for_visit(conn, visit_id)?;
    if let Some(set) = &current {
        conn.execute(
            "UPDATE diagnosis_sets SET active = 0 WHERE id = ?1",
            params![set.id.to_string()],
        )?;
    }
    Ok(current.map(|s| s.id))
}

pub fn insert_set(conn: &Connection, set: &DiagnosisSet) -> Result<(), DatabaseError> {
    conn.execute(
        &format!("INSERT INTO diagnosis_sets ({SET_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            set.id.to_string(),
            set.visit_id.to_string(),
            set.doctor_id.to_string(),
            set.notes,
            set.unsuitable,
            set.unsuitable_reason,
            set.active,
            set.created_at,
        ],
    )?;
    Ok(())
}

pub fn insert_item(conn: &Connection, item: &DiagnosisItem) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO diagnosis_items (id, set_id, code_id, detail_layout_id, position)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            item.id.to_string(),
            item.set_id.to_string(),
            item.code_id,
            item.detail_layout_id.map(|id| id.to_string()),
            item.position,
        ],
    )?;
    Ok(())
}

pub fn active_set_for_visit(
    conn: &Connection,
    visit_id: Uuid,
) -> Result<Option<DiagnosisSet>, DatabaseError> {
    Ok(conn
        .query_row(
            &format!("SELECT {SET_COLUMNS} FROM diagnosis_sets WHERE visit_id = ?1 AND active = 1"),
            params![visit_id.to_string()],
            set_from_row,
        )
        .optional()?)
}

/// Every set ever attached to a visit, oldest first.
pub fn sets_for_visit(conn: &Connection, visit_id: Uuid) -> Result<Vec<DiagnosisSet>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SET_COLUMNS} FROM diagnosis_sets WHERE visit_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let rows = stmt.query_map(params![visit_id.to_string()], set_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn items_for_set(conn: &Connection, set_id: Uuid) -> Result<Vec<DiagnosisItem>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, set_id, code_id, detail_layout_id, position
         FROM diagnosis_items WHERE set_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![set_id.to_string()], |row| {
        Ok(DiagnosisItem {
            id: uuid_col(row, 0)?,
            set_id: uuid_col(row, 1)?,
            code_id: row.get(2)?,
            detail_layout_id: opt_uuid_col(row, 3)?,
            position: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn upsert_diagnosis_code(conn: &Connection, code: &DiagnosisCode) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO diagnosis_codes (code_id, name) VALUES (?1, ?2)
         ON CONFLICT (code_id) DO UPDATE SET name = excluded.name",
        params![code.code_id, code.name],
    )?;
    Ok(())
}

pub fn get_diagnosis_code(conn: &Connection, code_id: &str) -> Result<Option<DiagnosisCode>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT code_id, name FROM diagnosis_codes WHERE code_id = ?1",
            params![code_id],
            |row| {
                Ok(DiagnosisCode {
                    code_id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?)
}

pub fn upsert_diagnosis_summary(
    conn: &Connection,
    visit_id: Uuid,
    codes: &[String],
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO visit_diagnosis_summaries (visit_id, codes, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (visit_id) DO UPDATE SET codes = excluded.codes, updated_at = excluded.updated_at",
        params![visit_id.to_string(), codes.join(","), at],
    )?;
    Ok(())
}

pub fn get_diagnosis_summary(conn: &Connection, visit_id: Uuid) -> Result<Option<Vec<String>>, DatabaseError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT codes FROM visit_diagnosis_summaries WHERE visit_id = ?1",
            params![visit_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.map(|codes| {
        codes
            .split(',')
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect()
    }))
}
