//! Versioned intake, review and diagnosis layouts.
//!
//! Layouts are immutable once uploaded. Parsed documents are cached by
//! version id for the life of the process; ids are never reused, so the
//! cache needs no invalidation.

pub mod document;
pub mod prefill;
pub mod registry;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

pub use document::{LayoutDocument, PotentialAnswer, Question};
pub use registry::{LayoutQuery, LayoutUpload};

use crate::context::RequestContext;
use crate::core_state::CoreState;
use crate::db;
use crate::error::CoreError;
use crate::models::enums::{LayoutPurpose, LayoutVariant, Role};
use crate::models::LayoutVersion;

// ═══════════════════════════════════════════════════════════
// Document cache
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
pub struct LayoutCache {
    docs: RwLock<HashMap<Uuid, Arc<LayoutDocument>>>,
}

impl LayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed document of a stored layout.
    pub fn document_for(&self, layout: &LayoutVersion) -> Result<Arc<LayoutDocument>, CoreError> {
        if let Some(doc) = self
            .docs
            .read()
            .map_err(|_| CoreError::internal("layout cache poisoned"))?
            .get(&layout.id)
        {
            return Ok(Arc::clone(doc));
        }

        let doc = Arc::new(LayoutDocument::parse(&layout.payload)?);
        self.docs
            .write()
            .map_err(|_| CoreError::internal("layout cache poisoned"))?
            .insert(layout.id, Arc::clone(&doc));
        Ok(doc)
    }

    pub fn document(&self, conn: &Connection, id: Uuid) -> Result<Arc<LayoutDocument>, CoreError> {
        if let Some(doc) = self
            .docs
            .read()
            .map_err(|_| CoreError::internal("layout cache poisoned"))?
            .get(&id)
        {
            return Ok(Arc::clone(doc));
        }
        let layout = db::get_layout(conn, id)?;
        self.document_for(&layout)
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ═══════════════════════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════════════════════

impl CoreState {
    pub fn upload_layout(
        &self,
        ctx: &RequestContext,
        upload: LayoutUpload,
    ) -> Result<LayoutVersion, CoreError> {
        ctx.require_role(&[Role::Admin])?;
        self.write(ctx, |tx| registry::upload(tx, &upload, Utc::now()))
    }

    pub fn activate_layout(&self, ctx: &RequestContext, id: Uuid) -> Result<LayoutVersion, CoreError> {
        ctx.require_role(&[Role::Admin])?;
        self.write(ctx, |tx| registry::activate(tx, id, Utc::now()))
    }

    pub fn resolve_layout(&self, query: &LayoutQuery<'_>) -> Result<LayoutVersion, CoreError> {
        self.store().read(|conn| registry::resolve(conn, query))
    }

    /// Resolve for the caller's own platform, app version and role.
    pub fn resolve_layout_for(
        &self,
        ctx: &RequestContext,
        pathway_tag: &str,
        purpose: LayoutPurpose,
        variant: LayoutVariant,
    ) -> Result<LayoutVersion, CoreError> {
        self.resolve_layout(&LayoutQuery {
            pathway_tag,
            purpose,
            variant,
            key: self.layout_selection_key(ctx),
        })
    }

    pub fn layout_version(&self, id: Uuid) -> Result<LayoutVersion, CoreError> {
        self.store().read(|conn| Ok(db::get_layout(conn, id)?))
    }

    pub fn layout_document(&self, id: Uuid) -> Result<Arc<LayoutDocument>, CoreError> {
        self.store().read(|conn| self.layouts().document(conn, id))
    }

    pub fn question_ids_by_tag(
        &self,
        layout_id: Uuid,
        tags: &[&str],
    ) -> Result<BTreeMap<String, i64>, CoreError> {
        let doc = self.layout_document(layout_id)?;
        Ok(registry::question_ids_by_tag(&doc, tags))
    }

    pub fn diagnosis_detail_layout(
        &self,
        code_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<LayoutVersion>, CoreError> {
        self.store()
            .read(|conn| registry::diagnosis_detail_at(conn, code_id, at))
    }

    pub fn review_layout_for_intake(&self, intake_id: Uuid) -> Result<Option<LayoutVersion>, CoreError> {
        self.store().read(|conn| {
            let intake = db::get_layout(conn, intake_id)?;
            registry::review_for_intake(conn, &intake)
        })
    }
}
