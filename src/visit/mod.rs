//! Case and visit lifecycles.
//!
//! ```text
//! visit:  open ─submit─► submitted ─charge─► charged ─route─► routed ─review─► reviewing ─TP─► treated
//!           │                └──────── route (zero-cost) ───────┘                  │
//!           └─► deleted                    any non-terminal ─unsuitable─► triaged ◄┘
//!
//! case:   open ─first submit─► active ─archive─► inactive
//!           └──────┬───────────┘
//!                  └─► pre_submission_triage ─confirm─► triaged        admin: any ─► deleted
//! ```
//!
//! Every transition is a compare-and-set on the status column; the loser of
//! a race gets `InvalidTransition`.

pub mod intake;
pub mod records;
pub mod routing;

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

pub use intake::VisitIntake;
pub use routing::RouteTarget;

use crate::care_team::{authorize, Operation};
use crate::context::RequestContext;
use crate::core_state::CoreState;
use crate::db;
use crate::error::{CoreError, StateConflict};
use crate::models::enums::{CaseStatus, PathwayStatus, QueueStatus, Role, VisitStatus};
use crate::models::{CaseNote, PatientCase, PatientVisit};

/// CAS a visit or fail with the observed status.
pub(crate) fn advance_visit(
    conn: &Connection,
    visit: &PatientVisit,
    from: &[VisitStatus],
    to: VisitStatus,
) -> Result<(), CoreError> {
    if db::cas_visit_status(conn, visit.id, from, to, Utc::now())? {
        tracing::debug!(visit = %visit.id, from = %visit.status, to = %to, "visit transition");
        Ok(())
    } else {
        let current = db::get_visit(conn, visit.id)?.status;
        Err(CoreError::transition("visit", current, to))
    }
}

pub(crate) fn advance_case(
    conn: &Connection,
    case_id: Uuid,
    from: &[CaseStatus],
    to: CaseStatus,
) -> Result<(), CoreError> {
    if db::cas_case_status(conn, case_id, from, to)? {
        tracing::debug!(case = %case_id, to = %to, "case transition");
        Ok(())
    } else {
        let current = db::get_case(conn, case_id)?.status;
        Err(CoreError::transition("case", current, to))
    }
}

fn internal_note(conn: &Connection, case_id: Uuid, author: Option<Uuid>, text: &str) -> Result<(), CoreError> {
    db::insert_note(
        conn,
        &CaseNote {
            id: Uuid::new_v4(),
            case_id,
            author_id: author,
            internal: true,
            text: text.to_string(),
            created_at: Utc::now(),
        },
    )?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Case operations
// ═══════════════════════════════════════════════════════════

impl CoreState {
    pub fn create_case(&self, ctx: &RequestContext, pathway_tag: &str) -> Result<PatientCase, CoreError> {
        ctx.require_role(&[Role::Patient])?;
        self.write(ctx, |tx| {
            let patient = ctx.require_patient(tx)?;
            let pathway = db::get_pathway(tx, pathway_tag)?
                .ok_or_else(|| CoreError::not_found("pathway", pathway_tag))?;
            if pathway.status != PathwayStatus::Active {
                return Err(CoreError::invalid(format!("pathway {pathway_tag} is deprecated")));
            }
            let existing = db::cases_for_patient(tx, patient.id)?
                .into_iter()
                .find(|c| c.pathway_tag == pathway_tag && !c.status.is_terminal());
            if let Some(existing) = existing {
                return Err(CoreError::Conflict(format!(
                    "patient already has case {} in {pathway_tag}",
                    existing.id
                )));
            }

            let case = PatientCase {
                id: Uuid::new_v4(),
                patient_id: patient.id,
                pathway_tag: pathway.tag,
                status: CaseStatus::Open,
                claimed: false,
                created_at: Utc::now(),
            };
            db::insert_case(tx, &case)?;
            tracing::info!(case = %case.id, pathway = %case.pathway_tag, "case created");
            Ok(case)
        })
    }

    pub fn case(&self, ctx: &RequestContext, case_id: Uuid) -> Result<PatientCase, CoreError> {
        self.store().read(|conn| {
            let case = db::get_case(conn, case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            Ok(case)
        })
    }

    /// The calling patient's cases, oldest first.
    pub fn my_cases(&self, ctx: &RequestContext) -> Result<Vec<PatientCase>, CoreError> {
        self.store().read(|conn| {
            let patient = ctx.require_patient(conn)?;
            Ok(db::cases_for_patient(conn, patient.id)?)
        })
    }

    pub fn visit(&self, ctx: &RequestContext, visit_id: Uuid) -> Result<PatientVisit, CoreError> {
        self.store().read(|conn| {
            let visit = db::get_visit(conn, visit_id)?;
            let case = db::get_case(conn, visit.case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            Ok(visit)
        })
    }

    pub fn visits(&self, ctx: &RequestContext, case_id: Uuid) -> Result<Vec<PatientVisit>, CoreError> {
        self.store().read(|conn| {
            let case = db::get_case(conn, case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            Ok(db::visits_for_case(conn, case_id)?)
        })
    }

    /// active → inactive once nothing is in flight.
    pub fn archive_case(&self, ctx: &RequestContext, case_id: Uuid) -> Result<PatientCase, CoreError> {
        ctx.require_role(&[Role::Admin, Role::CareCoordinator])?;
        self.write(ctx, |tx| {
            if let Some(visit) = db::in_flight_visit(tx, case_id)? {
                return Err(CoreError::StateConflict(StateConflict::VisitInFlight {
                    visit_id: visit.id,
                }));
            }
            advance_case(tx, case_id, &[CaseStatus::Active], CaseStatus::Inactive)?;
            tracing::info!(case = %case_id, "case archived");
            Ok(db::get_case(tx, case_id)?)
        })
    }

    /// Intake screened the patient out before submission. The open visit,
    /// if any, is triaged along with the case.
    pub fn flag_pre_submission_triage(
        &self,
        ctx: &RequestContext,
        case_id: Uuid,
        reason: &str,
    ) -> Result<PatientCase, CoreError> {
        self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            authorize(tx, ctx, Operation::WriteIntake, &case)?;
            advance_case(
                tx,
                case_id,
                &[CaseStatus::Open, CaseStatus::Active],
                CaseStatus::PreSubmissionTriage,
            )?;
            if let Some(visit) = db::visit_in_status(tx, case_id, VisitStatus::Open)? {
                advance_visit(tx, &visit, &[VisitStatus::Open], VisitStatus::Triaged)?;
            }
            if !reason.trim().is_empty() {
                internal_note(tx, case_id, None, &format!("Pre-submission triage: {}", reason.trim()))?;
            }
            tracing::info!(case = %case_id, "case flagged for pre-submission triage");
            Ok(db::get_case(tx, case_id)?)
        })
    }

    pub fn confirm_triage(&self, ctx: &RequestContext, case_id: Uuid) -> Result<PatientCase, CoreError> {
        ctx.require_role(&[Role::Admin, Role::CareCoordinator])?;
        self.write(ctx, |tx| {
            advance_case(tx, case_id, &[CaseStatus::PreSubmissionTriage], CaseStatus::Triaged)?;
            Ok(db::get_case(tx, case_id)?)
        })
    }

    /// Remove a case entirely; in-flight visits go with it.
    pub fn delete_case(&self, ctx: &RequestContext, case_id: Uuid) -> Result<PatientCase, CoreError> {
        ctx.require_role(&[Role::Admin])?;
        self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            let from = [
                CaseStatus::Open,
                CaseStatus::Active,
                CaseStatus::Inactive,
                CaseStatus::PreSubmissionTriage,
                CaseStatus::Triaged,
            ];
            advance_case(tx, case_id, &from, CaseStatus::Deleted)?;

            for visit in db::visits_for_case(tx, case_id)? {
                if visit.status.is_in_flight() {
                    advance_visit(tx, &visit, &VisitStatus::IN_FLIGHT, VisitStatus::Deleted)?;
                }
            }
            if db::get_queue_item(tx, case_id)?.is_some() {
                db::set_queue_status(tx, case_id, QueueStatus::Removed, None, Utc::now())?;
            }
            tracing::warn!(case = %case.id, by = %ctx.actor.account_id, "case deleted");
            Ok(db::get_case(tx, case_id)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin_ctx, Fixture, PATHWAY};

    #[test]
    fn second_case_in_same_pathway_conflicts() {
        let fx = Fixture::with_open_visit();
        let err = fx.core.create_case(&fx.patient_ctx(), PATHWAY).unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn unknown_pathway_is_not_found() {
        let fx = Fixture::new();
        let err = fx.core.create_case(&fx.patient_ctx(), "health_condition_gout").unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn doctors_cannot_create_cases() {
        let fx = Fixture::new();
        let err = fx.core.create_case(&fx.doctor_ctx(), PATHWAY).unwrap_err();
        assert_eq!(err.code(), "access_denied");
    }

    #[test]
    fn pre_submission_triage_takes_open_visit_along() {
        let fx = Fixture::with_open_visit();
        let case = fx
            .core
            .flag_pre_submission_triage(&fx.patient_ctx(), fx.case_id, "pregnant")
            .unwrap();
        assert_eq!(case.status, CaseStatus::PreSubmissionTriage);
        let visit = fx.core.visit(&fx.patient_ctx(), fx.visit_id).unwrap();
        assert_eq!(visit.status, VisitStatus::Triaged);

        let case = fx.core.confirm_triage(&fx.cc_ctx(), fx.case_id).unwrap();
        assert_eq!(case.status, CaseStatus::Triaged);

        let err = fx.core.confirm_triage(&fx.cc_ctx(), fx.case_id).unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn archive_needs_active_case_without_visit_in_flight() {
        let fx = Fixture::with_submitted_visit();
        let err = fx.core.archive_case(&admin_ctx(), fx.case_id).unwrap_err();
        assert_eq!(err.code(), "visit_in_flight");

        let fx = Fixture::with_treated_visit();
        let case = fx.core.archive_case(&admin_ctx(), fx.case_id).unwrap();
        assert_eq!(case.status, CaseStatus::Inactive);
    }

    #[test]
    fn delete_case_is_admin_only_and_sweeps_visits() {
        let fx = Fixture::with_routed_visit();
        let err = fx.core.delete_case(&fx.cc_ctx(), fx.case_id).unwrap_err();
        assert_eq!(err.code(), "access_denied");

        let case = fx.core.delete_case(&admin_ctx(), fx.case_id).unwrap();
        assert_eq!(case.status, CaseStatus::Deleted);
        let visit = fx.core.visit(&admin_ctx(), fx.visit_id).unwrap();
        assert_eq!(visit.status, VisitStatus::Deleted);
        assert!(fx.core.unclaimed_items(&fx.doctor_ctx()).unwrap().is_empty());

        let err = fx.core.delete_case(&admin_ctx(), fx.case_id).unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
    }
}
