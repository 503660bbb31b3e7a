//! Care-team assignment and the unclaimed queue.
//!
//! Assignments are append-only: the latest row per (provider, role) decides
//! whether that provider is on the case. Claiming races are settled by a
//! compare-and-set on the case's claimed flag.

pub mod access;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

pub use access::{AccessBasis, AccessDecision, AccessTarget, Operation};
pub(crate) use access::authorize;

use crate::context::RequestContext;
use crate::core_state::CoreState;
use crate::db;
use crate::error::{CoreError, StateConflict};
use crate::models::enums::{CaseStatus, ProviderRole, QueueStatus, RecordStatus, Role};
use crate::models::{CareTeamAssignment, PatientCase, QueueItem};

#[derive(Debug, Clone, Serialize)]
pub struct CareTeamMember {
    pub provider_id: Uuid,
    pub role: ProviderRole,
    pub display_name: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CareTeam {
    pub case_id: Uuid,
    pub members: Vec<CareTeamMember>,
}

impl CareTeam {
    pub fn doctor(&self) -> Option<&CareTeamMember> {
        self.members.iter().find(|m| m.role == ProviderRole::Doctor)
    }

    pub fn care_coordinator(&self) -> Option<&CareTeamMember> {
        self.members
            .iter()
            .find(|m| m.role == ProviderRole::CareCoordinator)
    }
}

fn append(
    conn: &Connection,
    case_id: Uuid,
    provider_id: Uuid,
    role: ProviderRole,
    status: RecordStatus,
    at: DateTime<Utc>,
) -> Result<CareTeamAssignment, CoreError> {
    let seq = db::append_assignment(conn, case_id, provider_id, role, status, at)?;
    Ok(CareTeamAssignment {
        seq,
        case_id,
        provider_id,
        role,
        status,
        assigned_at: at,
    })
}

fn require_eligible(
    conn: &Connection,
    provider_id: Uuid,
    role: ProviderRole,
    case: &PatientCase,
) -> Result<(), CoreError> {
    if db::is_provider_eligible(conn, provider_id, role, &case.pathway_tag)? {
        Ok(())
    } else {
        Err(CoreError::denied(format!(
            "provider {provider_id} is not a {role} in {}",
            case.pathway_tag
        )))
    }
}

/// Replace whoever holds `role` on the case with `provider_id`.
fn replace_member(
    conn: &Connection,
    case_id: Uuid,
    provider_id: Uuid,
    role: ProviderRole,
    at: DateTime<Utc>,
) -> Result<CareTeamAssignment, CoreError> {
    for current in db::active_assignments(conn, case_id)? {
        if current.role == role && current.provider_id != provider_id {
            append(conn, case_id, current.provider_id, role, RecordStatus::Inactive, at)?;
        }
    }
    append(conn, case_id, provider_id, role, RecordStatus::Active, at)
}

/// Put `doctor_id` on the case without going through the queue.
pub(crate) fn assign_doctor(
    conn: &Connection,
    case: &PatientCase,
    doctor_id: Uuid,
    at: DateTime<Utc>,
) -> Result<CareTeamAssignment, CoreError> {
    require_eligible(conn, doctor_id, ProviderRole::Doctor, case)?;
    let assignment = replace_member(conn, case.id, doctor_id, ProviderRole::Doctor, at)?;
    db::set_case_claimed(conn, case.id, true)?;
    if db::get_queue_item(conn, case.id)?.is_some() {
        db::set_queue_status(conn, case.id, QueueStatus::Claimed, Some(doctor_id), at)?;
    }
    Ok(assignment)
}

fn team(conn: &Connection, case_id: Uuid) -> Result<CareTeam, CoreError> {
    let members = db::active_assignments(conn, case_id)?
        .into_iter()
        .map(|a| {
            let display_name = db::get_provider(conn, a.provider_id)?
                .map(|p| p.display_name)
                .unwrap_or_default();
            Ok(CareTeamMember {
                provider_id: a.provider_id,
                role: a.role,
                display_name,
                assigned_at: a.assigned_at,
            })
        })
        .collect::<Result<Vec<_>, CoreError>>()?;
    Ok(CareTeam { case_id, members })
}

// ═══════════════════════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════════════════════

impl CoreState {
    pub fn can_access(
        &self,
        ctx: &RequestContext,
        op: Operation,
        target: AccessTarget,
    ) -> Result<AccessDecision, CoreError> {
        self.store().read(|conn| {
            let case = target.case(conn)?;
            authorize(conn, ctx, op, &case)
        })
    }

    /// Take an unclaimed case. Exactly one of several racing doctors wins;
    /// the others get `AlreadyClaimed`.
    pub fn claim_case(&self, ctx: &RequestContext, case_id: Uuid) -> Result<CareTeamAssignment, CoreError> {
        ctx.require_role(&[Role::Doctor])?;
        let doctor_id = ctx.actor.account_id;
        let assignment = self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            let item = db::get_queue_item(tx, case_id)?
                .ok_or_else(|| CoreError::not_found("queue item", case_id))?;
            match item.status {
                QueueStatus::Unclaimed => {}
                QueueStatus::Claimed => return Err(CoreError::StateConflict(StateConflict::AlreadyClaimed)),
                QueueStatus::Removed => return Err(CoreError::transition("queue item", item.status, "claimed")),
            }
            require_eligible(tx, doctor_id, ProviderRole::Doctor, &case)?;

            if !db::cas_case_claimed(tx, case_id, false)? {
                return Err(CoreError::StateConflict(StateConflict::AlreadyClaimed));
            }
            let now = Utc::now();
            let assignment = replace_member(tx, case_id, doctor_id, ProviderRole::Doctor, now)?;
            db::set_queue_status(tx, case_id, QueueStatus::Claimed, Some(doctor_id), now)?;
            Ok(assignment)
        });

        match &assignment {
            Ok(_) => tracing::info!(case = %case_id, doctor = %doctor_id, "case claimed"),
            Err(e) if e.is_state_conflict() => {
                tracing::info!(case = %case_id, doctor = %doctor_id, "claim lost")
            }
            Err(_) => {}
        }
        assignment
    }

    /// Give a claimed case back to the queue. Only the claiming doctor may.
    pub fn unclaim_case(&self, ctx: &RequestContext, case_id: Uuid) -> Result<QueueItem, CoreError> {
        ctx.require_role(&[Role::Doctor])?;
        let doctor_id = ctx.actor.account_id;
        self.write(ctx, |tx| {
            let item = db::get_queue_item(tx, case_id)?
                .ok_or_else(|| CoreError::not_found("queue item", case_id))?;
            if item.status != QueueStatus::Claimed || item.claimed_by != Some(doctor_id) {
                return Err(CoreError::denied("case is not claimed by this doctor"));
            }
            if !db::cas_case_claimed(tx, case_id, true)? {
                return Err(CoreError::transition("case", "unclaimed", "unclaimed"));
            }
            let now = Utc::now();
            append(tx, case_id, doctor_id, ProviderRole::Doctor, RecordStatus::Inactive, now)?;
            db::set_queue_status(tx, case_id, QueueStatus::Unclaimed, None, now)?;
            tracing::info!(case = %case_id, doctor = %doctor_id, "case returned to queue");
            Ok(db::get_queue_item(tx, case_id)?.unwrap_or(item))
        })
    }

    /// Move the case to another doctor in one transaction.
    pub fn change_provider(
        &self,
        ctx: &RequestContext,
        case_id: Uuid,
        new_doctor: Uuid,
    ) -> Result<CareTeam, CoreError> {
        self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            authorize(tx, ctx, Operation::ChangeProvider, &case)?;
            if !matches!(case.status, CaseStatus::Open | CaseStatus::Active) {
                return Err(CoreError::transition("case", case.status, "change provider"));
            }
            let previous = db::active_provider(tx, case_id, ProviderRole::Doctor)?;
            assign_doctor(tx, &case, new_doctor, Utc::now())?;
            tracing::info!(
                case = %case_id,
                from = ?previous,
                to = %new_doctor,
                by = %ctx.actor.account_id,
                "provider changed"
            );
            team(tx, case_id)
        })
    }

    pub fn assign_care_coordinator(
        &self,
        ctx: &RequestContext,
        case_id: Uuid,
        coordinator_id: Uuid,
    ) -> Result<CareTeam, CoreError> {
        ctx.require_role(&[Role::Admin, Role::CareCoordinator])?;
        self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            require_eligible(tx, coordinator_id, ProviderRole::CareCoordinator, &case)?;
            replace_member(tx, case_id, coordinator_id, ProviderRole::CareCoordinator, Utc::now())?;
            tracing::info!(case = %case_id, coordinator = %coordinator_id, "care coordinator assigned");
            team(tx, case_id)
        })
    }

    pub fn care_team(&self, ctx: &RequestContext, case_id: Uuid) -> Result<CareTeam, CoreError> {
        self.store().read(|conn| {
            let case = db::get_case(conn, case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            team(conn, case_id)
        })
    }

    /// Unclaimed cases in the calling doctor's pathways, oldest first.
    pub fn unclaimed_items(&self, ctx: &RequestContext) -> Result<Vec<QueueItem>, CoreError> {
        ctx.require_role(&[Role::Doctor])?;
        self.store().read(|conn| {
            let pathways = db::provider_pathways(conn, ctx.actor.account_id)?;
            Ok(db::unclaimed_items(conn, &pathways)?)
        })
    }

    /// Full assignment history of a case, oldest first.
    pub fn assignment_history(
        &self,
        ctx: &RequestContext,
        case_id: Uuid,
    ) -> Result<Vec<CareTeamAssignment>, CoreError> {
        self.store().read(|conn| {
            let case = db::get_case(conn, case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            Ok(db::assignment_history(conn, case_id)?)
        })
    }
}
