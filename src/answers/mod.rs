//! Answer intake store.
//!
//! Answers are written in batches under a client session counter and read
//! back as one canonical value per question. Rewrites never delete: the
//! previous rows are deactivated and stay as history.

pub mod convert;
pub mod render;
pub mod store;

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

pub use convert::{AnswerInput, AnswerItemInput, ConvertedAnswer};
pub use render::{render_answer, render_for_review};

use crate::care_team::{authorize, Operation};
use crate::context::RequestContext;
use crate::core_state::CoreState;
use crate::db;
use crate::error::{CoreError, StateConflict};
use crate::layout::LayoutDocument;
use crate::models::enums::{AnswerContext, Role, VisitStatus};
use crate::models::{AnswerPayload, AnswerRecord, PhotoSection};
use store::WriteScope;

/// Canonical answer as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerView {
    pub answer_id: Uuid,
    pub question_id: i64,
    pub question_tag: String,
    pub payload: AnswerPayload,
    pub prefilled: bool,
    pub session_counter: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_selection_id: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_answers: Vec<AnswerView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedPhotoSlot {
    pub slot_name: String,
    pub blob_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedPhotoSection {
    pub name: String,
    pub slots: Vec<SignedPhotoSlot>,
}

/// Match each input to a top-level question of `doc` and convert it.
pub(crate) fn convert_batch<'d>(
    conn: &Connection,
    doc: &'d LayoutDocument,
    inputs: &[AnswerInput],
) -> Result<Vec<ConvertedAnswer<'d>>, CoreError> {
    if inputs.is_empty() {
        return Err(CoreError::missing("answers"));
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(inputs.len());
    for input in inputs {
        if !seen.insert(input.question_id) {
            return Err(CoreError::invalid(format!(
                "question {} answered twice in one batch",
                input.question_id
            )));
        }
        let Some(question) = doc.question(input.question_id) else {
            return Err(if db::question_in_any_layout(conn, input.question_id)? {
                CoreError::StateConflict(StateConflict::LayoutMismatch {
                    question_id: input.question_id,
                })
            } else {
                CoreError::unknown_question(input.question_id)
            });
        };
        if !doc.is_top_level(input.question_id) {
            return Err(CoreError::invalid(format!(
                "question {} is answered through its parent",
                input.question_id
            )));
        }
        out.push(convert::convert(question, input)?);
    }
    Ok(out)
}

/// Canonical views for a context, optionally narrowed to `question_ids`.
pub(crate) fn answer_views(
    conn: &Connection,
    context: AnswerContext,
    context_id: Uuid,
    role: Role,
    question_ids: &[i64],
) -> Result<Vec<AnswerView>, CoreError> {
    store::canonical_answers(conn, context, context_id, role)?
        .into_iter()
        .filter(|a| question_ids.is_empty() || question_ids.contains(&a.question_id))
        .map(|a| store::view(conn, a))
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════════════════════

impl CoreState {
    /// Record a batch of intake answers for an open visit.
    pub fn put_answers(
        &self,
        ctx: &RequestContext,
        visit_id: Uuid,
        session_id: &str,
        counter: i64,
        answers: &[AnswerInput],
    ) -> Result<Vec<Uuid>, CoreError> {
        self.write(ctx, |tx| {
            let visit = db::get_visit(tx, visit_id)?;
            let case = db::get_case(tx, visit.case_id)?;
            authorize(tx, ctx, Operation::WriteIntake, &case)?;
            if visit.status != VisitStatus::Open {
                return Err(CoreError::transition("visit", visit.status, "intake"));
            }

            let doc = self.layouts().document(tx, visit.intake_layout_id)?;
            let converted = convert_batch(tx, &doc, answers)?;
            let scope = WriteScope {
                context: AnswerContext::Visit,
                context_id: visit.id,
                actor: ctx.actor,
                session_id,
                counter,
                layout_version_id: visit.intake_layout_id,
                at: Utc::now(),
            };
            store::claim_session_slot(tx, &scope)?;

            let ids = converted
                .iter()
                .map(|answer| store::persist(tx, &scope, answer))
                .collect::<Result<Vec<_>, _>>()?;
            tracing::info!(
                visit = %visit.id,
                session = session_id,
                counter,
                answers = ids.len(),
                "intake answers recorded"
            );
            Ok(ids)
        })
    }

    /// Canonical answers of `scope`'s role on a visit; all questions when
    /// `question_ids` is empty.
    pub fn get_answers(
        &self,
        ctx: &RequestContext,
        visit_id: Uuid,
        question_ids: &[i64],
        scope: Role,
    ) -> Result<Vec<AnswerView>, CoreError> {
        self.store().read(|conn| {
            let visit = db::get_visit(conn, visit_id)?;
            let case = db::get_case(conn, visit.case_id)?;
            authorize(conn, ctx, Operation::ReadIntake, &case)?;
            answer_views(conn, AnswerContext::Visit, visit.id, scope, question_ids)
        })
    }

    pub fn put_photo_section(
        &self,
        ctx: &RequestContext,
        visit_id: Uuid,
        session_id: &str,
        counter: i64,
        question_id: i64,
        sections: Vec<PhotoSection>,
    ) -> Result<Uuid, CoreError> {
        let ids = self.put_answers(
            ctx,
            visit_id,
            session_id,
            counter,
            &[AnswerInput::photos(question_id, sections)],
        )?;
        ids.into_iter()
            .next()
            .ok_or_else(|| CoreError::internal("photo write produced no answer"))
    }

    pub fn get_photo_sections(
        &self,
        ctx: &RequestContext,
        visit_id: Uuid,
        question_id: i64,
    ) -> Result<Vec<PhotoSection>, CoreError> {
        let views = self.get_answers(ctx, visit_id, &[question_id], Role::Patient)?;
        match views.into_iter().next().map(|v| v.payload) {
            None => Ok(Vec::new()),
            Some(AnswerPayload::PhotoSection { sections }) => Ok(sections),
            Some(_) => Err(CoreError::invalid(format!(
                "question {question_id} is not a photo question"
            ))),
        }
    }

    /// Photo sections with short-lived URLs from the blob store.
    pub fn signed_photo_sections(
        &self,
        ctx: &RequestContext,
        visit_id: Uuid,
        question_id: i64,
        ttl: Duration,
    ) -> Result<Vec<SignedPhotoSection>, CoreError> {
        let sections = self.get_photo_sections(ctx, visit_id, question_id)?;
        sections
            .into_iter()
            .map(|section| {
                let slots = section
                    .slots
                    .into_iter()
                    .map(|slot| {
                        ctx.deadline.check("blob")?;
                        let url = self.blobs().signed_url(&slot.blob_id, ttl, ctx.deadline)?;
                        Ok(SignedPhotoSlot {
                            slot_name: slot.slot_name,
                            blob_id: slot.blob_id,
                            url,
                        })
                    })
                    .collect::<Result<Vec<_>, CoreError>>()?;
                Ok(SignedPhotoSection { name: section.name, slots })
            })
            .collect()
    }

    pub fn answers_for_prefill(
        &self,
        case_id: Uuid,
        question_tags: &[&str],
    ) -> Result<Vec<AnswerRecord>, CoreError> {
        self.store()
            .read(|conn| store::answers_for_prefill(conn, case_id, question_tags))
    }
}
