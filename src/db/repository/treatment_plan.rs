use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{enum_col, json_col, opt_uuid_col, to_json, uuid_col, DatabaseError};
use crate::models::enums::TreatmentPlanStatus;
use crate::models::{ContentSource, FavoriteTreatmentPlan, ParentRef, PlanSections, TreatmentPlan};

const TP_COLUMNS: &str = "id, case_id, visit_id, doctor_id, status, parent_type, parent_id,
     content_source_id, deviated, content, created_at, sent_at, viewed";

fn tp_from_row(row: &Row<'_>) -> rusqlite::Result<TreatmentPlan> {
    let source = opt_uuid_col(row, 7)?;
    let deviated: bool = row.get(8)?;
    Ok(TreatmentPlan {
        id: uuid_col(row, 0)?,
        case_id: uuid_col(row, 1)?,
        visit_id: uuid_col(row, 2)?,
        doctor_id: uuid_col(row, 3)?,
        status: enum_col(row, 4)?,
        parent: ParentRef {
            kind: enum_col(row, 5)?,
            id: uuid_col(row, 6)?,
        },
        content_source: source.map(|favorite_id| ContentSource { favorite_id, deviated }),
        content: json_col(row, 9)?,
        created_at: row.get(10)?,
        sent_at: row.get(11)?,
        viewed: row.get(12)?,
    })
}

pub fn insert_treatment_plan(conn: &Connection, tp: &TreatmentPlan) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO treatment_plans ({TP_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            tp.id.to_string(),
            tp.case_id.to_string(),
            tp.visit_id.to_string(),
            tp.doctor_id.to_string(),
            tp.status.as_str(),
            tp.parent.kind.as_str(),
            tp.parent.id.to_string(),
            tp.content_source.map(|s| s.favorite_id.to_string()),
            tp.content_source.is_some_and(|s| s.deviated),
            to_json("treatment_plans.content", &tp.content)?,
            tp.created_at,
            tp.sent_at,
            tp.viewed,
        ],
    )?;
    Ok(())
}

pub fn get_treatment_plan(conn: &Connection, id: Uuid) -> Result<TreatmentPlan, DatabaseError> {
    conn.query_row(
        &format!("SELECT {TP_COLUMNS} FROM treatment_plans WHERE id = ?1"),
        params![id.to_string()],
        tp_from_row,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("treatment_plan", id))
}

pub fn find_draft(
    conn: &Connection,
    doctor_id: Uuid,
    case_id: Uuid,
) -> Result<Option<TreatmentPlan>, DatabaseError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {TP_COLUMNS} FROM treatment_plans
                 WHERE doctor_id = ?1 AND case_id = ?2 AND status = 'draft'"
            ),
            params![doctor_id.to_string(), case_id.to_string()],
            tp_from_row,
        )
        .optional()?)
}

pub fn plans_for_case(conn: &Connection, case_id: Uuid) -> Result<Vec<TreatmentPlan>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TP_COLUMNS} FROM treatment_plans WHERE case_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let rows = stmt.query_map(params![case_id.to_string()], tp_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Draft-only content update. Returns false if the plan is no longer a draft.
pub fn update_draft_content(
    conn: &Connection,
    id: Uuid,
    content: &PlanSections,
    deviated: bool,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE treatment_plans SET content = ?2, deviated = (deviated OR ?3)
         WHERE id = ?1 AND status = 'draft'",
        params![id.to_string(), to_json("treatment_plans.content", content)?, deviated],
    )?;
    Ok(changed == 1)
}

/// Compare-and-set the plan status, stamping `sent_at` when given.
pub fn cas_plan_status(
    conn: &Connection,
    id: Uuid,
    from: &[TreatmentPlanStatus],
    to: TreatmentPlanStatus,
    sent_at: Option<DateTime<Utc>>,
) -> Result<bool, DatabaseError> {
    let allowed: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let allowed_json = serde_json::to_string(&allowed)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
    let changed = conn.execute(
        "UPDATE treatment_plans SET status = ?2, sent_at = COALESCE(?4, sent_at)
         WHERE id = ?1 AND status IN (SELECT value FROM json_each(?3))",
        params![id.to_string(), to.as_str(), allowed_json, sent_at],
    )?;
    Ok(changed == 1)
}

/// Move every draft on a visit to inactive. Returns how many were retired.
pub fn retire_drafts_for_visit(conn: &Connection, visit_id: Uuid) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE treatment_plans SET status = 'inactive' WHERE visit_id = ?1 AND status = 'draft'",
        params![visit_id.to_string()],
    )?)
}

pub fn mark_plan_viewed(conn: &Connection, id: Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE treatment_plans SET viewed = 1 WHERE id = ?1 AND status = 'active'",
        params![id.to_string()],
    )?;
    Ok(changed == 1)
}

// ── Favorite templates ──────────────────────────────────────

pub fn insert_favorite(conn: &Connection, fav: &FavoriteTreatmentPlan) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO favorite_treatment_plans (id, doctor_id, pathway_tag, name, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            fav.id.to_string(),
            fav.doctor_id.to_string(),
            fav.pathway_tag,
            fav.name,
            to_json("favorite_treatment_plans.content", &fav.content)?,
            fav.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_favorite(conn: &Connection, id: Uuid) -> Result<FavoriteTreatmentPlan, DatabaseError> {
    conn.query_row(
        "SELECT id, doctor_id, pathway_tag, name, content, created_at
         FROM favorite_treatment_plans WHERE id = ?1",
        params![id.to_string()],
        |row| {
            Ok(FavoriteTreatmentPlan {
                id: uuid_col(row, 0)?,
                doctor_id: uuid_col(row, 1)?,
                pathway_tag: row.get(2)?,
                name: row.get(3)?,
                content: json_col(row, 4)?,
                created_at: row.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("favorite_treatment_plan", id))
}
