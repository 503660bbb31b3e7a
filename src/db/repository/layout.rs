use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::compat::{AppVersion, VersionRange};
use crate::db::{enum_col, uuid_col, DatabaseError};
use crate::models::enums::{LayoutPurpose, LayoutStatus, LayoutVariant};
use crate::models::{LayoutBucket, LayoutVersion};

const LAYOUT_COLUMNS: &str = "id, pathway_tag, purpose, variant, role, platform, major, minor, patch,
     min_app_version, max_app_version, diagnosis_code, sku_type, status, checksum, payload,
     created_at, activated_at, deactivated_at";

fn version_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<AppVersion> {
    let raw: String = row.get(idx)?;
    AppVersion::parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(DatabaseError::ConstraintViolation(e.to_string())),
        )
    })
}

fn layout_from_row(row: &Row<'_>) -> rusqlite::Result<LayoutVersion> {
    let max = match row.get::<_, Option<String>>(10)? {
        Some(_) => Some(version_col(row, 10)?),
        None => None,
    };
    Ok(LayoutVersion {
        id: uuid_col(row, 0)?,
        pathway_tag: row.get(1)?,
        purpose: enum_col(row, 2)?,
        variant: enum_col(row, 3)?,
        role: enum_col(row, 4)?,
        platform: enum_col(row, 5)?,
        version: AppVersion::new(row.get(6)?, row.get(7)?, row.get(8)?),
        app_range: VersionRange {
            min: version_col(row, 9)?,
            max,
        },
        diagnosis_code: row.get(11)?,
        sku_type: row.get(12)?,
        status: enum_col(row, 13)?,
        checksum: row.get(14)?,
        payload: row.get(15)?,
        created_at: row.get(16)?,
        activated_at: row.get(17)?,
        deactivated_at: row.get(18)?,
    })
}

pub fn insert_layout(conn: &Connection, layout: &LayoutVersion) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO layout_versions ({LAYOUT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
        ),
        params![
            layout.id.to_string(),
            layout.pathway_tag,
            layout.purpose.as_str(),
            layout.variant.as_str(),
            layout.role.as_str(),
            layout.platform.as_str(),
            layout.version.major,
            layout.version.minor,
            layout.version.patch,
            layout.app_range.min.to_string(),
            layout.app_range.max.map(|v| v.to_string()),
            layout.diagnosis_code,
            layout.sku_type,
            layout.status.as_str(),
            layout.checksum,
            layout.payload,
            layout.created_at,
            layout.activated_at,
            layout.deactivated_at,
        ],
    )?;
    Ok(())
}

pub fn get_layout(conn: &Connection, id: Uuid) -> Result<LayoutVersion, DatabaseError> {
    conn.query_row(
        &format!("SELECT {LAYOUT_COLUMNS} FROM layout_versions WHERE id = ?1"),
        params![id.to_string()],
        layout_from_row,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("layout", id))
}

const BUCKET_FILTER: &str = "pathway_tag = ?1 AND purpose = ?2 AND variant = ?3 AND role = ?4
     AND platform = ?5 AND COALESCE(diagnosis_code, '') = ?6";

/// Layouts of one bucket, optionally narrowed to a status, newest semver first.
pub fn layouts_in_bucket(
    conn: &Connection,
    bucket: &LayoutBucket,
    status: Option<LayoutStatus>,
) -> Result<Vec<LayoutVersion>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LAYOUT_COLUMNS} FROM layout_versions
         WHERE {BUCKET_FILTER} AND (?7 IS NULL OR status = ?7)
         ORDER BY major DESC, minor DESC, patch DESC, created_at DESC"
    ))?;
    let rows = stmt.query_map(
        params![
            bucket.pathway_tag,
            bucket.purpose.as_str(),
            bucket.variant.as_str(),
            bucket.role.as_str(),
            bucket.platform.as_str(),
            bucket.diagnosis_code.clone().unwrap_or_default(),
            status.map(|s| s.as_str()),
        ],
        layout_from_row,
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn find_layout_by_checksum(
    conn: &Connection,
    bucket: &LayoutBucket,
    checksum: &str,
) -> Result<Option<LayoutVersion>, DatabaseError> {
    Ok(layouts_in_bucket(conn, bucket, None)?
        .into_iter()
        .find(|l| l.checksum == checksum))
}

/// Compare-and-set a layout's status. Returns whether the row changed.
pub fn set_layout_status(
    conn: &Connection,
    id: Uuid,
    from: LayoutStatus,
    to: LayoutStatus,
    at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = match to {
        LayoutStatus::Active => conn.execute(
            "UPDATE layout_versions SET status = ?3, activated_at = ?4, deactivated_at = NULL
             WHERE id = ?1 AND status = ?2",
            params![id.to_string(), from.as_str(), to.as_str(), at],
        )?,
        _ => conn.execute(
            "UPDATE layout_versions SET status = ?3, deactivated_at = ?4
             WHERE id = ?1 AND status = ?2",
            params![id.to_string(), from.as_str(), to.as_str(), at],
        )?,
    };
    Ok(changed == 1)
}

/// Diagnosis-detail layouts for a code that were active at `at`, newest semver first.
pub fn diagnosis_detail_layouts_at(
    conn: &Connection,
    code_id: &str,
    at: DateTime<Utc>,
) -> Result<Vec<LayoutVersion>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LAYOUT_COLUMNS} FROM layout_versions
         WHERE purpose = ?1 AND diagnosis_code = ?2
           AND activated_at IS NOT NULL AND activated_at <= ?3
           AND (deactivated_at IS NULL OR deactivated_at > ?3)
         ORDER BY major DESC, minor DESC, patch DESC"
    ))?;
    let rows = stmt.query_map(
        params![LayoutPurpose::DiagnosisDetail.as_str(), code_id, at],
        layout_from_row,
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Whether any stored layout, in any state, declares `question_id`.
pub fn question_in_any_layout(conn: &Connection, question_id: i64) -> Result<bool, DatabaseError> {
    Ok(conn.query_row(
        "SELECT EXISTS (
             SELECT 1 FROM layout_versions, json_tree(layout_versions.payload) AS node
             WHERE node.key = 'question_id' AND node.atom = ?1
         )",
        params![question_id],
        |row| row.get(0),
    )?)
}

/// Active layouts for a pathway/purpose/variant regardless of role and platform.
pub fn active_layouts_for(
    conn: &Connection,
    pathway_tag: &str,
    purpose: LayoutPurpose,
    variant: LayoutVariant,
) -> Result<Vec<LayoutVersion>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LAYOUT_COLUMNS} FROM layout_versions
         WHERE pathway_tag = ?1 AND purpose = ?2 AND variant = ?3 AND status = 'active'
         ORDER BY major DESC, minor DESC, patch DESC"
    ))?;
    let rows = stmt.query_map(
        params![pathway_tag, purpose.as_str(), variant.as_str()],
        layout_from_row,
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
