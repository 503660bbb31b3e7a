//! Opening, filling and submitting visits.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::{advance_case, advance_visit};
use crate::answers::{self, AnswerView};
use crate::care_team::{authorize, Operation};
use crate::context::RequestContext;
use crate::core_state::CoreState;
use crate::db;
use crate::error::{CoreError, StateConflict};
use crate::events::{self, CoreEvent};
use crate::layout::registry::{self, LayoutQuery};
use crate::layout::{prefill, LayoutDocument};
use crate::models::enums::{
    AnswerContext, CaseStatus, LayoutPurpose, LayoutVariant, Role, VisitStatus,
};
use crate::models::{AnswerRecord, LayoutVersion, PatientCase, PatientVisit};

/// Intake layout plus what the patient has answered so far.
#[derive(Debug, Clone, Serialize)]
pub struct VisitIntake {
    pub visit: PatientVisit,
    pub layout_version_id: Uuid,
    pub document: Arc<LayoutDocument>,
    pub answers: Vec<AnswerView>,
}

/// Top-level questions that still need an answer.
pub(crate) fn missing_required<'d>(doc: &'d LayoutDocument, answers: &[AnswerRecord]) -> Vec<&'d str> {
    doc.questions()
        .filter(|q| q.required || q.photo_slots.iter().any(|s| s.required))
        .filter(|q| !answers.iter().any(|a| a.question_id == q.question_id))
        .map(|q| q.question_tag.as_str())
        .collect()
}

impl CoreState {
    fn resolve_intake(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        case: &PatientCase,
        variant: LayoutVariant,
    ) -> Result<LayoutVersion, CoreError> {
        let key = self.features().layout_selection_key(&ctx.client, Role::Patient);
        let query = |variant| LayoutQuery {
            pathway_tag: &case.pathway_tag,
            purpose: LayoutPurpose::Intake,
            variant,
            key,
        };
        match registry::resolve(conn, &query(variant)) {
            Err(CoreError::LayoutNotFound(_)) if variant == LayoutVariant::Followup => {
                tracing::debug!(pathway = %case.pathway_tag, "no followup intake, using initial");
                registry::resolve(conn, &query(LayoutVariant::Initial))
            }
            other => other,
        }
    }

    fn open_visit_in(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        case: &PatientCase,
        parent: Option<&PatientVisit>,
    ) -> Result<PatientVisit, CoreError> {
        if let Some(in_flight) = db::in_flight_visit(conn, case.id)? {
            return Err(CoreError::StateConflict(StateConflict::VisitInFlight {
                visit_id: in_flight.id,
            }));
        }

        let variant = if parent.is_some() {
            LayoutVariant::Followup
        } else {
            LayoutVariant::Initial
        };
        let intake = self.resolve_intake(conn, ctx, case, variant)?;
        let review = registry::review_for_intake(conn, &intake)?;
        if review.is_none() {
            tracing::warn!(intake = %intake.id, "no review layout pairs with intake");
        }

        let now = Utc::now();
        let visit = PatientVisit {
            id: Uuid::new_v4(),
            case_id: case.id,
            pathway_tag: case.pathway_tag.clone(),
            status: VisitStatus::Open,
            sku_type: intake.sku_type.clone(),
            is_followup: parent.is_some(),
            parent_visit_id: parent.map(|p| p.id),
            intake_layout_id: intake.id,
            review_layout_id: review.map(|r| r.id),
            created_at: now,
            submitted_at: None,
            treated_at: None,
        };
        db::insert_visit(conn, &visit)?;

        let doc = self.layouts().document_for(&intake)?;
        let prefilled = prefill::prefill_visit(conn, &doc, &visit, now)?;
        tracing::info!(
            visit = %visit.id,
            case = %case.id,
            layout = %intake.id,
            followup = visit.is_followup,
            prefilled = prefilled.len(),
            "visit opened"
        );
        Ok(visit)
    }

    /// Open the next visit of a case. Once a visit has been treated this
    /// behaves like `create_followup`.
    pub fn open_visit(&self, ctx: &RequestContext, case_id: Uuid) -> Result<PatientVisit, CoreError> {
        self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            authorize(tx, ctx, Operation::WriteIntake, &case)?;
            if !matches!(case.status, CaseStatus::Open | CaseStatus::Active) {
                return Err(CoreError::transition("case", case.status, "visit"));
            }
            let parent = db::latest_treated_visit(tx, case_id)?;
            self.open_visit_in(tx, ctx, &case, parent.as_ref())
        })
    }

    pub fn create_followup(&self, ctx: &RequestContext, case_id: Uuid) -> Result<PatientVisit, CoreError> {
        self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            authorize(tx, ctx, Operation::WriteIntake, &case)?;
            if case.status != CaseStatus::Active {
                return Err(CoreError::transition("case", case.status, "followup"));
            }
            let parent = db::latest_treated_visit(tx, case_id)?
                .ok_or_else(|| CoreError::transition("case", "untreated", "followup"))?;
            self.open_visit_in(tx, ctx, &case, Some(&parent))
        })
    }

    pub fn visit_intake(&self, ctx: &RequestContext, visit_id: Uuid) -> Result<VisitIntake, CoreError> {
        self.store().read(|conn| {
            let visit = db::get_visit(conn, visit_id)?;
            let case = db::get_case(conn, visit.case_id)?;
            authorize(conn, ctx, Operation::ReadIntake, &case)?;
            let document = self.layouts().document(conn, visit.intake_layout_id)?;
            let answers =
                answers::answer_views(conn, AnswerContext::Visit, visit.id, Role::Patient, &[])?;
            Ok(VisitIntake {
                layout_version_id: visit.intake_layout_id,
                visit,
                document,
                answers,
            })
        })
    }

    /// open → submitted once every required question is answered.
    pub fn submit_visit(&self, ctx: &RequestContext, visit_id: Uuid) -> Result<PatientVisit, CoreError> {
        self.write_and_notify(ctx, |tx| {
            let visit = db::get_visit(tx, visit_id)?;
            let case = db::get_case(tx, visit.case_id)?;
            authorize(tx, ctx, Operation::WriteIntake, &case)?;
            if visit.status != VisitStatus::Open {
                return Err(CoreError::transition("visit", visit.status, VisitStatus::Submitted));
            }

            let doc = self.layouts().document(tx, visit.intake_layout_id)?;
            let answered = answers::store::canonical_answers(
                tx,
                AnswerContext::Visit,
                visit.id,
                Role::Patient,
            )?;
            let missing = missing_required(&doc, &answered);
            if !missing.is_empty() {
                return Err(CoreError::incomplete_visit(format!(
                    "unanswered: {}",
                    missing.join(", ")
                )));
            }

            advance_visit(tx, &visit, &[VisitStatus::Open], VisitStatus::Submitted)?;
            if case.status == CaseStatus::Open {
                advance_case(tx, case.id, &[CaseStatus::Open], CaseStatus::Active)?;
            }

            let submitted = db::get_visit(tx, visit.id)?;
            events::emit(
                tx,
                &CoreEvent::VisitSubmitted {
                    visit_id: submitted.id,
                    case_id: case.id,
                    patient_id: case.patient_id,
                    at: submitted.submitted_at.unwrap_or_else(Utc::now),
                },
            )?;
            tracing::info!(visit = %visit.id, case = %case.id, "visit submitted");
            Ok(submitted)
        })
    }

    /// The patient abandons an intake in progress.
    pub fn delete_visit(&self, ctx: &RequestContext, visit_id: Uuid) -> Result<PatientVisit, CoreError> {
        self.write(ctx, |tx| {
            let visit = db::get_visit(tx, visit_id)?;
            let case = db::get_case(tx, visit.case_id)?;
            authorize(tx, ctx, Operation::WriteIntake, &case)?;
            advance_visit(tx, &visit, &[VisitStatus::Open], VisitStatus::Deleted)?;
            tracing::info!(visit = %visit.id, "visit deleted");
            Ok(db::get_visit(tx, visit.id)?)
        })
    }
}
