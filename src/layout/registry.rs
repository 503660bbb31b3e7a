//! Layout upload, activation and resolution over the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::document::LayoutDocument;
use crate::compat::{LayoutSelectionKey, VersionRange};
use crate::db;
use crate::error::CoreError;
use crate::models::enums::{LayoutPurpose, LayoutRole, LayoutStatus, LayoutVariant, Platform};
use crate::models::{LayoutBucket, LayoutVersion};

/// Admin-supplied layout version.
#[derive(Debug, Clone)]
pub struct LayoutUpload {
    pub pathway_tag: String,
    pub purpose: LayoutPurpose,
    pub variant: LayoutVariant,
    pub role: LayoutRole,
    pub platform: Platform,
    pub app_range: VersionRange,
    /// Set only for diagnosis-detail layouts.
    pub diagnosis_code: Option<String>,
    pub document_json: String,
}

/// What a resolution is for, beyond the client's selection key.
#[derive(Debug, Clone)]
pub struct LayoutQuery<'a> {
    pub pathway_tag: &'a str,
    pub purpose: LayoutPurpose,
    pub variant: LayoutVariant,
    pub key: LayoutSelectionKey,
}

fn checksum(payload: &str) -> String {
    format!("{:x}", Sha256::digest(payload.as_bytes()))
}

/// Validate and store a new layout version in `pending` state.
///
/// Uploading a byte-identical document into the same bucket returns the
/// existing version.
pub fn upload(
    conn: &Connection,
    upload: &LayoutUpload,
    now: DateTime<Utc>,
) -> Result<LayoutVersion, CoreError> {
    if db::get_pathway(conn, &upload.pathway_tag)?.is_none() {
        return Err(CoreError::not_found("pathway", &upload.pathway_tag));
    }
    match (upload.purpose, &upload.diagnosis_code) {
        (LayoutPurpose::DiagnosisDetail, None) => {
            return Err(CoreError::missing("diagnosis_code"));
        }
        (LayoutPurpose::DiagnosisDetail, Some(_)) => {}
        (_, Some(_)) => {
            return Err(CoreError::invalid(
                "diagnosis_code only applies to diagnosis-detail layouts",
            ));
        }
        (_, None) => {}
    }

    let doc = LayoutDocument::parse(&upload.document_json)?;
    if doc.pathway_tag != upload.pathway_tag {
        return Err(CoreError::invalid(format!(
            "document pathway '{}' does not match '{}'",
            doc.pathway_tag, upload.pathway_tag
        )));
    }

    let payload = doc.to_json()?;
    let sum = checksum(&payload);
    let bucket = LayoutBucket {
        pathway_tag: upload.pathway_tag.clone(),
        purpose: upload.purpose,
        variant: upload.variant,
        role: upload.role,
        platform: upload.platform,
        diagnosis_code: upload.diagnosis_code.clone(),
    };
    if let Some(existing) = db::find_layout_by_checksum(conn, &bucket, &sum)? {
        tracing::debug!(layout = %existing.id, "identical layout already uploaded");
        return Ok(existing);
    }

    let layout = LayoutVersion {
        id: Uuid::new_v4(),
        pathway_tag: upload.pathway_tag.clone(),
        purpose: upload.purpose,
        variant: upload.variant,
        role: upload.role,
        platform: upload.platform,
        version: doc.version,
        app_range: upload.app_range,
        diagnosis_code: upload.diagnosis_code.clone(),
        sku_type: doc.sku_type.clone(),
        status: LayoutStatus::Pending,
        checksum: sum,
        payload,
        created_at: now,
        activated_at: None,
        deactivated_at: None,
    };
    db::insert_layout(conn, &layout)?;
    tracing::info!(
        layout = %layout.id,
        pathway = %layout.pathway_tag,
        purpose = %layout.purpose,
        version = %layout.version,
        "layout uploaded"
    );
    Ok(layout)
}

/// Make `id` the active layout of its bucket for its app-version range.
///
/// Every active layout in the bucket whose range overlaps is deactivated
/// first, so at most one layout answers any app version.
pub fn activate(conn: &Connection, id: Uuid, now: DateTime<Utc>) -> Result<LayoutVersion, CoreError> {
    let layout = db::get_layout(conn, id)?;
    if layout.status == LayoutStatus::Active {
        return Ok(layout);
    }

    let mut displaced = 0;
    for other in db::layouts_in_bucket(conn, &layout.bucket(), Some(LayoutStatus::Active))? {
        if other.id != id && other.app_range.overlaps(&layout.app_range) {
            db::set_layout_status(conn, other.id, LayoutStatus::Active, LayoutStatus::Inactive, now)?;
            displaced += 1;
        }
    }

    if !db::set_layout_status(conn, id, layout.status, LayoutStatus::Active, now)? {
        return Err(CoreError::transition("layout", layout.status, LayoutStatus::Active));
    }
    tracing::info!(layout = %id, displaced, "layout activated");
    Ok(db::get_layout(conn, id)?)
}

/// Highest-versioned active layout matching the query.
pub fn resolve(conn: &Connection, query: &LayoutQuery<'_>) -> Result<LayoutVersion, CoreError> {
    let bucket = LayoutBucket {
        pathway_tag: query.pathway_tag.to_string(),
        purpose: query.purpose,
        variant: query.variant,
        role: query.key.role,
        platform: query.key.platform,
        diagnosis_code: None,
    };
    db::layouts_in_bucket(conn, &bucket, Some(LayoutStatus::Active))?
        .into_iter()
        .find(|l| l.app_range.contains(query.key.app_version))
        .ok_or_else(|| {
            CoreError::LayoutNotFound(format!(
                "{} {} {} for {} {} {}",
                query.pathway_tag,
                query.purpose,
                query.variant,
                query.key.role,
                query.key.platform,
                query.key.app_version
            ))
        })
}

/// Diagnosis-detail layout that was active for `code_id` at `at`.
pub fn diagnosis_detail_at(
    conn: &Connection,
    code_id: &str,
    at: DateTime<Utc>,
) -> Result<Option<LayoutVersion>, CoreError> {
    Ok(db::diagnosis_detail_layouts_at(conn, code_id, at)?
        .into_iter()
        .next())
}

/// Active doctor review layout paired with an intake layout by major version.
pub fn review_for_intake(
    conn: &Connection,
    intake: &LayoutVersion,
) -> Result<Option<LayoutVersion>, CoreError> {
    Ok(
        db::active_layouts_for(conn, &intake.pathway_tag, LayoutPurpose::Review, intake.variant)?
            .into_iter()
            .find(|l| l.role == LayoutRole::Doctor && l.version.major == intake.version.major),
    )
}

/// Question ids for the requested tags; unknown tags are left out.
pub fn question_ids_by_tag(doc: &LayoutDocument, tags: &[&str]) -> BTreeMap<String, i64> {
    tags.iter()
        .filter_map(|tag| {
            doc.question_by_tag(tag)
                .map(|q| (tag.to_string(), q.question_id))
        })
        .collect()
}
