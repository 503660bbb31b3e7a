//! Diagnosis sets attached to a visit.
//!
//! A visit carries at most one active set. Attaching a new set retires the
//! previous one; retired sets stay readable as history. Each item may have a
//! detail intake answered by the doctor against the diagnosis-detail layout
//! that was active for its code when the set was committed.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::answers::store::{self as answer_store, WriteScope};
use crate::answers::{self, AnswerInput, AnswerView};
use crate::care_team::{authorize, Operation};
use crate::context::RequestContext;
use crate::core_state::CoreState;
use crate::db;
use crate::error::CoreError;
use crate::events::{self, CoreEvent};
use crate::layout::{registry, Question};
use crate::models::enums::{AnswerContext, Role, VisitStatus};
use crate::models::{DiagnosisCode, DiagnosisItem, DiagnosisSet, PatientVisit};
use crate::visit::advance_visit;

#[derive(Debug, Clone, Default)]
pub struct DiagnosisItemInput {
    pub code_id: String,
    pub detail_answers: Vec<AnswerInput>,
}

impl DiagnosisItemInput {
    pub fn code(code_id: &str) -> Self {
        Self {
            code_id: code_id.to_string(),
            detail_answers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosisSetInput {
    pub items: Vec<DiagnosisItemInput>,
    pub notes: Option<String>,
    pub unsuitable: bool,
    pub unsuitable_reason: Option<String>,
}

impl DiagnosisSetInput {
    pub fn unsuitable(reason: &str) -> Self {
        Self {
            unsuitable: true,
            unsuitable_reason: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisItemView {
    pub item: DiagnosisItem,
    pub code: Option<DiagnosisCode>,
    pub questions: Vec<Question>,
    pub answers: BTreeMap<i64, AnswerView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisSetView {
    pub set: DiagnosisSet,
    pub items: Vec<DiagnosisItemView>,
    /// Set shown for a followup that has none of its own: the earlier visit it came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherited_from: Option<Uuid>,
}

fn validate(input: &DiagnosisSetInput) -> Result<(), CoreError> {
    if input.unsuitable {
        let reason = input.unsuitable_reason.as_deref().unwrap_or("").trim();
        if reason.is_empty() {
            return Err(CoreError::missing("unsuitable_reason"));
        }
    } else if input.items.is_empty() {
        return Err(CoreError::missing("diagnosis items"));
    }

    let mut seen = HashSet::new();
    for item in &input.items {
        if item.code_id.trim().is_empty() {
            return Err(CoreError::missing("code_id"));
        }
        if !seen.insert(item.code_id.as_str()) {
            return Err(CoreError::invalid(format!("{} diagnosed twice", item.code_id)));
        }
    }
    Ok(())
}

impl CoreState {
    fn persist_item(
        &self,
        conn: &Connection,
        ctx: &RequestContext,
        set_id: Uuid,
        position: usize,
        input: &DiagnosisItemInput,
    ) -> Result<DiagnosisItem, CoreError> {
        if db::get_diagnosis_code(conn, &input.code_id)?.is_none() {
            return Err(CoreError::not_found("diagnosis code", &input.code_id));
        }
        let now = Utc::now();
        let detail = registry::diagnosis_detail_at(conn, &input.code_id, now)?;
        let item = DiagnosisItem {
            id: Uuid::new_v4(),
            set_id,
            code_id: input.code_id.clone(),
            detail_layout_id: detail.as_ref().map(|l| l.id),
            position: position as i64,
        };
        db::insert_item(conn, &item)?;

        if input.detail_answers.is_empty() {
            return Ok(item);
        }
        let Some(layout) = detail else {
            return Err(CoreError::invalid(format!(
                "{} has no detail questions to answer",
                input.code_id
            )));
        };
        let doc = self.layouts().document_for(&layout)?;
        let converted = answers::convert_batch(conn, &doc, &input.detail_answers)?;
        let session = set_id.to_string();
        let scope = WriteScope {
            context: AnswerContext::DiagnosisItem,
            context_id: item.id,
            actor: ctx.actor,
            session_id: &session,
            counter: 0,
            layout_version_id: layout.id,
            at: now,
        };
        for answer in &converted {
            answer_store::persist(conn, &scope, answer)?;
        }
        Ok(item)
    }

    /// Replace the visit's diagnosis. An unsuitable set triages the visit.
    pub fn attach_diagnosis_set(
        &self,
        ctx: &RequestContext,
        visit_id: Uuid,
        input: DiagnosisSetInput,
    ) -> Result<DiagnosisSet, CoreError> {
        ctx.require_role(&[Role::Doctor])?;
        validate(&input)?;
        self.write_and_notify(ctx, |tx| {
            let visit = db::get_visit(tx, visit_id)?;
            let case = db::get_case(tx, visit.case_id)?;
            authorize(tx, ctx, Operation::WriteDiagnosis, &case)?;
            if input.unsuitable {
                if !visit.status.is_in_flight() {
                    return Err(CoreError::transition("visit", visit.status, VisitStatus::Triaged));
                }
            } else if visit.status != VisitStatus::Reviewing {
                return Err(CoreError::transition("visit", visit.status, "diagnosed"));
            }

            let previous = db::deactivate_active_set(tx, visit.id)?;
            let now = Utc::now();
            let set = DiagnosisSet {
                id: Uuid::new_v4(),
                visit_id: visit.id,
                doctor_id: ctx.actor.account_id,
                notes: input.notes.clone().filter(|n| !n.trim().is_empty()),
                unsuitable: input.unsuitable,
                unsuitable_reason: input.unsuitable_reason.clone(),
                active: true,
                created_at: now,
            };
            db::insert_set(tx, &set)?;
            for (position, item) in input.items.iter().enumerate() {
                self.persist_item(tx, ctx, set.id, position, item)?;
            }

            if set.unsuitable {
                advance_visit(tx, &visit, &VisitStatus::IN_FLIGHT, VisitStatus::Triaged)?;
                let retired = db::retire_drafts_for_visit(tx, visit.id)?;
                if retired > 0 {
                    tracing::info!(visit = %visit.id, retired, "open drafts retired");
                }
                events::emit(
                    tx,
                    &CoreEvent::VisitMarkedUnsuitable {
                        visit_id: visit.id,
                        case_id: case.id,
                        doctor_id: set.doctor_id,
                        reason: set.unsuitable_reason.clone().unwrap_or_default(),
                        at: now,
                    },
                )?;
                tracing::info!(visit = %visit.id, "visit marked unsuitable");
            } else {
                events::emit(
                    tx,
                    &CoreEvent::DiagnosisModified {
                        visit_id: visit.id,
                        case_id: case.id,
                        set_id: set.id,
                        doctor_id: set.doctor_id,
                        at: now,
                    },
                )?;
            }
            tracing::info!(
                visit = %visit.id,
                set = %set.id,
                replaced = ?previous,
                items = input.items.len(),
                "diagnosis attached"
            );
            Ok(set)
        })
    }

    /// The visit's active set, enriched. Followups without their own set
    /// show the one from the most recent treated visit, without copying it.
    pub fn active_diagnosis_set(
        &self,
        ctx: &RequestContext,
        visit_id: Uuid,
    ) -> Result<Option<DiagnosisSetView>, CoreError> {
        self.store().read(|conn| {
            let visit = db::get_visit(conn, visit_id)?;
            let case = db::get_case(conn, visit.case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;

            if let Some(set) = db::active_set_for_visit(conn, visit.id)? {
                return self.set_view(conn, set, None).map(Some);
            }
            if !visit.is_followup {
                return Ok(None);
            }
            match inherited_set(conn, &visit)? {
                Some((source, set)) => self.set_view(conn, set, Some(source)).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Every set ever attached to the visit, oldest first.
    pub fn diagnosis_history(&self, ctx: &RequestContext, visit_id: Uuid) -> Result<Vec<DiagnosisSet>, CoreError> {
        self.store().read(|conn| {
            let visit = db::get_visit(conn, visit_id)?;
            let case = db::get_case(conn, visit.case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            Ok(db::sets_for_visit(conn, visit.id)?)
        })
    }

    /// Codes of the active set as last summarized by the pipeline; empty
    /// until the first `DiagnosisModified` has been dispatched.
    pub fn diagnosis_summary(&self, ctx: &RequestContext, visit_id: Uuid) -> Result<Vec<String>, CoreError> {
        self.store().read(|conn| {
            let visit = db::get_visit(conn, visit_id)?;
            let case = db::get_case(conn, visit.case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            Ok(db::get_diagnosis_summary(conn, visit.id)?.unwrap_or_default())
        })
    }

    fn set_view(
        &self,
        conn: &Connection,
        set: DiagnosisSet,
        inherited_from: Option<Uuid>,
    ) -> Result<DiagnosisSetView, CoreError> {
        let items = db::items_for_set(conn, set.id)?
            .into_iter()
            .map(|item| {
                let code = db::get_diagnosis_code(conn, &item.code_id)?;
                let questions = match item.detail_layout_id {
                    Some(layout_id) => self
                        .layouts()
                        .document(conn, layout_id)?
                        .questions()
                        .cloned()
                        .collect(),
                    None => Vec::new(),
                };
                let answers = answers::answer_views(
                    conn,
                    AnswerContext::DiagnosisItem,
                    item.id,
                    Role::Doctor,
                    &[],
                )?
                .into_iter()
                .map(|a| (a.question_id, a))
                .collect();
                Ok(DiagnosisItemView { item, code, questions, answers })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        Ok(DiagnosisSetView { set, items, inherited_from })
    }
}

/// Most recent active set on an earlier treated visit of the same case.
fn inherited_set(
    conn: &Connection,
    visit: &PatientVisit,
) -> Result<Option<(Uuid, DiagnosisSet)>, CoreError> {
    for earlier in db::visits_for_case(conn, visit.case_id)?.into_iter().rev() {
        if earlier.id == visit.id || earlier.status != VisitStatus::Treated {
            continue;
        }
        if let Some(set) = db::active_set_for_visit(conn, earlier.id)? {
            return Ok(Some((earlier.id, set)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{q, Fixture, ACNE_CODE, ROSACEA_CODE};

    fn acne_with_detail() -> DiagnosisSetInput {
        DiagnosisSetInput {
            items: vec![DiagnosisItemInput {
                code_id: ACNE_CODE.into(),
                detail_answers: vec![AnswerInput::select(q::DETAIL_SEVERITY, q::DETAIL_SEVERE)],
            }],
            notes: Some("Comedonal, mostly forehead".into()),
            ..DiagnosisSetInput::default()
        }
    }

    #[test]
    fn attach_records_detail_answers() {
        let fx = Fixture::with_reviewing_visit();
        let doctor = fx.doctor_ctx();
        fx.core.attach_diagnosis_set(&doctor, fx.visit_id, acne_with_detail()).unwrap();

        let view = fx.core.active_diagnosis_set(&doctor, fx.visit_id).unwrap().unwrap();
        assert!(view.inherited_from.is_none());
        assert_eq!(view.items.len(), 1);
        let item = &view.items[0];
        assert_eq!(item.code.as_ref().unwrap().name, "Acne vulgaris");
        assert!(item.item.detail_layout_id.is_some());
        assert!(!item.questions.is_empty());
        let answer = &item.answers[&q::DETAIL_SEVERITY];
        assert_eq!(answer.payload.selections()[0].potential_answer_id, q::DETAIL_SEVERE);
    }

    #[test]
    fn only_one_active_set_per_visit() {
        let fx = Fixture::with_reviewing_visit();
        let doctor = fx.doctor_ctx();
        let first = fx.core.attach_diagnosis_set(&doctor, fx.visit_id, acne_with_detail()).unwrap();
        let second = fx
            .core
            .attach_diagnosis_set(
                &doctor,
                fx.visit_id,
                DiagnosisSetInput {
                    items: vec![DiagnosisItemInput::code(ROSACEA_CODE)],
                    ..DiagnosisSetInput::default()
                },
            )
            .unwrap();

        let history = fx.core.diagnosis_history(&doctor, fx.visit_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|s| s.active).count(), 1);
        assert!(!history.iter().find(|s| s.id == first.id).unwrap().active);

        let view = fx.core.active_diagnosis_set(&doctor, fx.visit_id).unwrap().unwrap();
        assert_eq!(view.set.id, second.id);
        assert!(view.items[0].item.detail_layout_id.is_none());
    }

    #[test]
    fn code_without_detail_layout_rejects_detail_answers() {
        let fx = Fixture::with_reviewing_visit();
        let err = fx
            .core
            .attach_diagnosis_set(
                &fx.doctor_ctx(),
                fx.visit_id,
                DiagnosisSetInput {
                    items: vec![DiagnosisItemInput {
                        code_id: ROSACEA_CODE.into(),
                        detail_answers: vec![AnswerInput::select(q::DETAIL_SEVERITY, q::DETAIL_SEVERE)],
                    }],
                    ..DiagnosisSetInput::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn input_is_validated() {
        let fx = Fixture::with_reviewing_visit();
        let doctor = fx.doctor_ctx();
        let err = fx
            .core
            .attach_diagnosis_set(&doctor, fx.visit_id, DiagnosisSetInput::default())
            .unwrap_err();
        assert_eq!(err.code(), "missing_field");

        let err = fx
            .core
            .attach_diagnosis_set(&doctor, fx.visit_id, DiagnosisSetInput::unsuitable("  "))
            .unwrap_err();
        assert_eq!(err.code(), "missing_field");

        let err = fx
            .core
            .attach_diagnosis_set(
                &doctor,
                fx.visit_id,
                DiagnosisSetInput {
                    items: vec![DiagnosisItemInput::code("Z99.9")],
                    ..DiagnosisSetInput::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn unassigned_doctor_cannot_diagnose() {
        let fx = Fixture::with_reviewing_visit();
        let err = fx
            .core
            .attach_diagnosis_set(&fx.other_doctor_ctx(), fx.visit_id, acne_with_detail())
            .unwrap_err();
        assert_eq!(err.code(), "access_denied");
    }

    #[test]
    fn unsuitable_triages_visit() {
        let fx = Fixture::with_reviewing_visit();
        fx.core
            .attach_diagnosis_set(&fx.doctor_ctx(), fx.visit_id, DiagnosisSetInput::unsuitable("Not treatable"))
            .unwrap();
        let visit = fx.core.visit(&fx.doctor_ctx(), fx.visit_id).unwrap();
        assert_eq!(visit.status, VisitStatus::Triaged);

        let err = fx
            .core
            .attach_diagnosis_set(&fx.doctor_ctx(), fx.visit_id, acne_with_detail())
            .unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn followup_falls_back_to_treated_visit_set() {
        let fx = Fixture::with_treated_visit();
        let followup = fx.core.create_followup(&fx.patient_ctx(), fx.case_id).unwrap();
        let view = fx
            .core
            .active_diagnosis_set(&fx.doctor_ctx(), followup.id)
            .unwrap()
            .unwrap();
        assert_eq!(view.inherited_from, Some(fx.visit_id));
        assert!(view.set.active);
        // Nothing was copied onto the followup.
        assert!(fx.core.diagnosis_history(&fx.doctor_ctx(), followup.id).unwrap().is_empty());
    }
}
