//! Treatment plan lifecycle.
//!
//! ```text
//! draft ─submit─► submitted ─rx─► rx_started ─sent─► active ─► inactive
//!                     └──────────── sent ──────────────┘
//! ```
//!
//! Content is editable only while the plan is a draft. A plan started from a
//! favorite template remembers whether the doctor ever deviated from it.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use uuid::Uuid;

use crate::care_team::{authorize, Operation};
use crate::context::RequestContext;
use crate::core_state::CoreState;
use crate::db;
use crate::error::CoreError;
use crate::events::{self, CoreEvent};
use crate::models::enums::{ParentType, ProviderRole, Role, TreatmentPlanStatus, VisitStatus};
use crate::models::{
    ContentSource, FavoriteTreatmentPlan, ParentRef, PatientCase, PatientVisit, PlanSections,
    TreatmentPlan,
};
use crate::visit::advance_visit;

fn section_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Whether `content` differs from the template in any tracked section.
fn deviates(tracked: &[String], template: &PlanSections, content: &PlanSections) -> bool {
    tracked
        .iter()
        .any(|section| template.get(section) != content.get(section))
}

fn require_owner(ctx: &RequestContext, plan: &TreatmentPlan) -> Result<(), CoreError> {
    if ctx.actor.is(Role::Doctor) && plan.doctor_id == ctx.actor.account_id {
        Ok(())
    } else {
        Err(CoreError::denied("treatment plan belongs to another doctor"))
    }
}

/// The plan's creator or an admin; status callbacks come from either.
fn require_owner_or_admin(ctx: &RequestContext, plan: &TreatmentPlan) -> Result<(), CoreError> {
    if ctx.actor.is(Role::Admin) {
        Ok(())
    } else {
        require_owner(ctx, plan)
    }
}

fn advance_plan(
    conn: &Connection,
    plan: &TreatmentPlan,
    from: &[TreatmentPlanStatus],
    to: TreatmentPlanStatus,
) -> Result<(), CoreError> {
    let sent_at = (to == TreatmentPlanStatus::Submitted).then(Utc::now);
    if db::cas_plan_status(conn, plan.id, from, to, sent_at)? {
        tracing::debug!(plan = %plan.id, from = %plan.status, to = %to, "treatment plan transition");
        Ok(())
    } else {
        let current = db::get_treatment_plan(conn, plan.id)?.status;
        Err(CoreError::transition("treatment plan", current, to))
    }
}

fn resolve_parent(
    conn: &Connection,
    case: &PatientCase,
    visit: &PatientVisit,
    explicit: Option<ParentRef>,
) -> Result<ParentRef, CoreError> {
    if let Some(parent) = explicit {
        match parent.kind {
            ParentType::Visit => {
                let v = db::get_visit(conn, parent.id)?;
                if v.case_id != case.id {
                    return Err(CoreError::invalid("parent visit belongs to another case"));
                }
            }
            ParentType::TreatmentPlan => {
                let tp = db::get_treatment_plan(conn, parent.id)?;
                if tp.case_id != case.id {
                    return Err(CoreError::invalid("parent plan belongs to another case"));
                }
                if tp.status == TreatmentPlanStatus::Draft {
                    return Err(CoreError::invalid("parent plan is still a draft"));
                }
            }
        }
        return Ok(parent);
    }

    if visit.is_followup {
        let latest_active = db::plans_for_case(conn, case.id)?
            .into_iter()
            .rev()
            .find(|tp| tp.status == TreatmentPlanStatus::Active);
        if let Some(tp) = latest_active {
            return Ok(ParentRef { kind: ParentType::TreatmentPlan, id: tp.id });
        }
    }
    Ok(ParentRef { kind: ParentType::Visit, id: visit.id })
}

impl CoreState {
    fn load_plan(&self, conn: &Connection, ctx: &RequestContext, op: Operation, id: Uuid) -> Result<TreatmentPlan, CoreError> {
        let plan = db::get_treatment_plan(conn, id)?;
        let case = db::get_case(conn, plan.case_id)?;
        authorize(conn, ctx, op, &case)?;
        Ok(plan)
    }

    /// Start (or return) the calling doctor's draft for the case's visit under review.
    pub fn create_draft(
        &self,
        ctx: &RequestContext,
        case_id: Uuid,
        parent: Option<ParentRef>,
        content_source: Option<Uuid>,
    ) -> Result<TreatmentPlan, CoreError> {
        ctx.require_role(&[Role::Doctor])?;
        let doctor_id = ctx.actor.account_id;
        self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            authorize(tx, ctx, Operation::WriteTreatmentPlan, &case)?;
            if let Some(existing) = db::find_draft(tx, doctor_id, case_id)? {
                let visit = db::get_visit(tx, existing.visit_id)?;
                if visit.status != VisitStatus::Reviewing {
                    return Err(CoreError::transition("visit", visit.status, "treatment plan"));
                }
                tracing::debug!(plan = %existing.id, "returning existing draft");
                return Ok(existing);
            }

            let Some(visit) = db::visit_in_status(tx, case_id, VisitStatus::Reviewing)? else {
                let latest = db::visits_for_case(tx, case_id)?
                    .last()
                    .map(|v| v.status.to_string())
                    .unwrap_or_else(|| "none".into());
                return Err(CoreError::transition("visit", latest, "treatment plan"));
            };
            let parent = resolve_parent(tx, &case, &visit, parent)?;

            let (content, source) = match content_source {
                Some(favorite_id) => {
                    let favorite = db::get_favorite(tx, favorite_id)?;
                    if favorite.doctor_id != doctor_id {
                        return Err(CoreError::denied("favorite belongs to another doctor"));
                    }
                    if favorite.pathway_tag != case.pathway_tag {
                        return Err(CoreError::invalid("favorite is for another pathway"));
                    }
                    (favorite.content, Some(ContentSource { favorite_id, deviated: false }))
                }
                None => (PlanSections::new(), None),
            };

            let plan = TreatmentPlan {
                id: Uuid::new_v4(),
                case_id,
                visit_id: visit.id,
                doctor_id,
                status: TreatmentPlanStatus::Draft,
                parent,
                content_source: source,
                content,
                created_at: Utc::now(),
                sent_at: None,
                viewed: false,
            };
            db::insert_treatment_plan(tx, &plan)?;
            tracing::info!(plan = %plan.id, visit = %visit.id, parent = ?plan.parent.kind, "draft created");
            Ok(plan)
        })
    }

    pub fn update_draft(
        &self,
        ctx: &RequestContext,
        plan_id: Uuid,
        sections: PlanSections,
    ) -> Result<TreatmentPlan, CoreError> {
        self.write(ctx, |tx| {
            let plan = self.load_plan(tx, ctx, Operation::WriteTreatmentPlan, plan_id)?;
            require_owner(ctx, &plan)?;
            if plan.status != TreatmentPlanStatus::Draft {
                return Err(CoreError::transition("treatment plan", plan.status, "edited"));
            }

            let deviated = match plan.content_source {
                Some(source) => {
                    let favorite = db::get_favorite(tx, source.favorite_id)?;
                    deviates(&self.config().tracked_plan_sections, &favorite.content, &sections)
                }
                None => false,
            };
            if !db::update_draft_content(tx, plan.id, &sections, deviated)? {
                return Err(CoreError::transition("treatment plan", "submitted", "edited"));
            }
            Ok(db::get_treatment_plan(tx, plan.id)?)
        })
    }

    /// draft → submitted and the visit → treated, together or not at all.
    pub fn submit_draft(&self, ctx: &RequestContext, plan_id: Uuid) -> Result<TreatmentPlan, CoreError> {
        self.write_and_notify(ctx, |tx| {
            let plan = self.load_plan(tx, ctx, Operation::WriteTreatmentPlan, plan_id)?;
            require_owner(ctx, &plan)?;
            if plan.status != TreatmentPlanStatus::Draft {
                return Err(CoreError::transition("treatment plan", plan.status, TreatmentPlanStatus::Submitted));
            }
            for section in &self.config().required_plan_sections {
                if !plan.content.get(section).is_some_and(section_filled) {
                    return Err(CoreError::missing(section));
                }
            }

            let visit = db::get_visit(tx, plan.visit_id)?;
            advance_visit(tx, &visit, &[VisitStatus::Reviewing], VisitStatus::Treated)?;
            advance_plan(tx, &plan, &[TreatmentPlanStatus::Draft], TreatmentPlanStatus::Submitted)?;

            let submitted = db::get_treatment_plan(tx, plan.id)?;
            events::emit(
                tx,
                &CoreEvent::TreatmentPlanSubmitted {
                    treatment_plan_id: submitted.id,
                    visit_id: visit.id,
                    case_id: submitted.case_id,
                    doctor_id: submitted.doctor_id,
                    at: submitted.sent_at.unwrap_or_else(Utc::now),
                },
            )?;
            tracing::info!(plan = %submitted.id, visit = %visit.id, "treatment plan submitted");
            Ok(submitted)
        })
    }

    pub fn mark_rx_started(&self, ctx: &RequestContext, plan_id: Uuid) -> Result<TreatmentPlan, CoreError> {
        self.write(ctx, |tx| {
            let plan = self.load_plan(tx, ctx, Operation::WriteTreatmentPlan, plan_id)?;
            require_owner_or_admin(ctx, &plan)?;
            advance_plan(tx, &plan, &[TreatmentPlanStatus::Submitted], TreatmentPlanStatus::RxStarted)?;
            Ok(db::get_treatment_plan(tx, plan.id)?)
        })
    }

    /// The plan reached the patient; it replaces any other active plan of the case.
    pub fn mark_sent(&self, ctx: &RequestContext, plan_id: Uuid) -> Result<TreatmentPlan, CoreError> {
        self.write(ctx, |tx| {
            let plan = self.load_plan(tx, ctx, Operation::WriteTreatmentPlan, plan_id)?;
            require_owner_or_admin(ctx, &plan)?;
            advance_plan(
                tx,
                &plan,
                &[TreatmentPlanStatus::Submitted, TreatmentPlanStatus::RxStarted],
                TreatmentPlanStatus::Active,
            )?;
            for other in db::plans_for_case(tx, plan.case_id)? {
                if other.id != plan.id && other.status == TreatmentPlanStatus::Active {
                    advance_plan(tx, &other, &[TreatmentPlanStatus::Active], TreatmentPlanStatus::Inactive)?;
                    tracing::info!(plan = %other.id, replaced_by = %plan.id, "treatment plan superseded");
                }
            }
            Ok(db::get_treatment_plan(tx, plan.id)?)
        })
    }

    pub fn deactivate_treatment_plan(&self, ctx: &RequestContext, plan_id: Uuid) -> Result<TreatmentPlan, CoreError> {
        self.write(ctx, |tx| {
            let plan = self.load_plan(tx, ctx, Operation::WriteTreatmentPlan, plan_id)?;
            advance_plan(
                tx,
                &plan,
                &[
                    TreatmentPlanStatus::Submitted,
                    TreatmentPlanStatus::RxStarted,
                    TreatmentPlanStatus::Active,
                ],
                TreatmentPlanStatus::Inactive,
            )?;
            Ok(db::get_treatment_plan(tx, plan.id)?)
        })
    }

    /// The patient opened their active plan.
    pub fn mark_viewed(&self, ctx: &RequestContext, plan_id: Uuid) -> Result<TreatmentPlan, CoreError> {
        ctx.require_role(&[Role::Patient])?;
        self.write(ctx, |tx| {
            let plan = self.load_plan(tx, ctx, Operation::ReadCase, plan_id)?;
            if !plan.viewed && !db::mark_plan_viewed(tx, plan.id)? {
                return Err(CoreError::transition("treatment plan", plan.status, "viewed"));
            }
            Ok(db::get_treatment_plan(tx, plan.id)?)
        })
    }

    /// Patients never see drafts.
    pub fn treatment_plan(&self, ctx: &RequestContext, plan_id: Uuid) -> Result<TreatmentPlan, CoreError> {
        self.store().read(|conn| {
            let plan = self.load_plan(conn, ctx, Operation::ReadCase, plan_id)?;
            if ctx.actor.is(Role::Patient) && plan.status == TreatmentPlanStatus::Draft {
                return Err(CoreError::not_found("treatment_plan", plan_id));
            }
            Ok(plan)
        })
    }

    /// Parent chain from the plan up to the visit it ultimately answers.
    pub fn ancestry(&self, ctx: &RequestContext, plan_id: Uuid) -> Result<Vec<ParentRef>, CoreError> {
        self.store().read(|conn| {
            let plan = self.load_plan(conn, ctx, Operation::ReadCase, plan_id)?;
            let limit = db::visits_for_case(conn, plan.case_id)?.len()
                + db::plans_for_case(conn, plan.case_id)?.len();

            let mut chain = Vec::new();
            let mut seen = HashSet::from([plan.id]);
            let mut next = plan.parent;
            loop {
                chain.push(next);
                if next.kind == ParentType::Visit {
                    return Ok(chain);
                }
                if !seen.insert(next.id) || chain.len() > limit {
                    return Err(CoreError::internal(format!("treatment plan {plan_id} has a parent cycle")));
                }
                next = db::get_treatment_plan(conn, next.id)?.parent;
            }
        })
    }

    pub fn create_favorite_template(
        &self,
        ctx: &RequestContext,
        pathway_tag: &str,
        name: &str,
        sections: PlanSections,
    ) -> Result<FavoriteTreatmentPlan, CoreError> {
        ctx.require_role(&[Role::Doctor])?;
        if name.trim().is_empty() {
            return Err(CoreError::missing("name"));
        }
        self.write(ctx, |tx| {
            if !db::is_provider_eligible(tx, ctx.actor.account_id, ProviderRole::Doctor, pathway_tag)? {
                return Err(CoreError::denied(format!("doctor does not practice in {pathway_tag}")));
            }
            let favorite = FavoriteTreatmentPlan {
                id: Uuid::new_v4(),
                doctor_id: ctx.actor.account_id,
                pathway_tag: pathway_tag.to_string(),
                name: name.trim().to_string(),
                content: sections,
                created_at: Utc::now(),
            };
            db::insert_favorite(tx, &favorite)?;
            tracing::info!(favorite = %favorite.id, pathway = pathway_tag, "favorite template saved");
            Ok(favorite)
        })
    }
}
