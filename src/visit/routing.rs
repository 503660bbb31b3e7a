//! From submission to a doctor's desk.

use chrono::Utc;
use uuid::Uuid;

use super::advance_visit;
use crate::care_team::{self, authorize, Operation};
use crate::context::RequestContext;
use crate::core_state::CoreState;
use crate::db;
use crate::error::CoreError;
use crate::models::enums::{ProviderRole, Role, VisitStatus};
use crate::models::PatientVisit;

/// Where a charged visit goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// The unclaimed queue of the pathway, unless a doctor already holds the case.
    Queue,
    /// Direct assignment to an eligible doctor.
    Doctor(Uuid),
}

impl CoreState {
    /// Payment collaborator callback: submitted → charged.
    pub fn mark_visit_charged(&self, ctx: &RequestContext, visit_id: Uuid) -> Result<PatientVisit, CoreError> {
        ctx.require_role(&[Role::Admin])?;
        self.write(ctx, |tx| {
            let visit = db::get_visit(tx, visit_id)?;
            advance_visit(tx, &visit, &[VisitStatus::Submitted], VisitStatus::Charged)?;
            tracing::info!(visit = %visit.id, sku = %visit.sku_type, "visit charged");
            Ok(db::get_visit(tx, visit.id)?)
        })
    }

    pub fn route_visit(
        &self,
        ctx: &RequestContext,
        visit_id: Uuid,
        target: RouteTarget,
    ) -> Result<PatientVisit, CoreError> {
        ctx.require_role(&[Role::Admin, Role::CareCoordinator])?;
        self.write(ctx, |tx| {
            let visit = db::get_visit(tx, visit_id)?;
            let case = db::get_case(tx, visit.case_id)?;
            let from: &[VisitStatus] = if self.config().is_zero_cost(&visit.sku_type) {
                &[VisitStatus::Submitted, VisitStatus::Charged]
            } else {
                &[VisitStatus::Charged]
            };
            advance_visit(tx, &visit, from, VisitStatus::Routed)?;

            let now = Utc::now();
            let doctor = match target {
                RouteTarget::Doctor(doctor_id) => Some(doctor_id),
                RouteTarget::Queue => db::active_provider(tx, case.id, ProviderRole::Doctor)?,
            };
            match doctor {
                Some(doctor_id) => {
                    care_team::assign_doctor(tx, &case, doctor_id, now)?;
                    tracing::info!(visit = %visit.id, doctor = %doctor_id, "visit routed to doctor");
                }
                None => {
                    db::enqueue_case(tx, case.id, visit.id, &case.pathway_tag, now)?;
                    db::set_case_claimed(tx, case.id, false)?;
                    tracing::info!(visit = %visit.id, pathway = %case.pathway_tag, "visit queued");
                }
            }
            Ok(db::get_visit(tx, visit.id)?)
        })
    }

    /// routed → reviewing, by the doctor on the case.
    pub fn begin_review(&self, ctx: &RequestContext, visit_id: Uuid) -> Result<PatientVisit, CoreError> {
        ctx.require_role(&[Role::Doctor])?;
        self.write(ctx, |tx| {
            let visit = db::get_visit(tx, visit_id)?;
            let case = db::get_case(tx, visit.case_id)?;
            authorize(tx, ctx, Operation::WriteDiagnosis, &case)?;
            advance_visit(tx, &visit, &[VisitStatus::Routed], VisitStatus::Reviewing)?;
            tracing::info!(
                target: "analytics",
                event = "visit_review_started",
                visit = %visit.id,
                doctor = %ctx.actor.account_id,
                pathway = %visit.pathway_tag,
                "review started"
            );
            Ok(db::get_visit(tx, visit.id)?)
        })
    }
}
