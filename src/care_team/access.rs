//! Who may do what to which case.
//!
//! | role              | basis                         | operations                                  |
//! |-------------------|-------------------------------|---------------------------------------------|
//! | patient           | owns the case                 | read case/intake, write intake, messages    |
//! | doctor            | active doctor assignment      | read case/intake, diagnosis, plans, messages, notes |
//! | care coordinator  | staff                         | read case/intake, tags, change provider, notes, messages |
//! | admin             | staff                         | everything                                  |

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::db;
use crate::error::CoreError;
use crate::models::enums::{ProviderRole, Role};
use crate::models::PatientCase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ReadCase,
    ReadIntake,
    WriteIntake,
    WriteDiagnosis,
    WriteTreatmentPlan,
    WriteMessage,
    Tag,
    ChangeProvider,
    AddNote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessBasis {
    Owner,
    Assignment,
    CareCoordinator,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub case_id: Uuid,
    pub operation: Operation,
    pub basis: AccessBasis,
}

/// What an access check is about; everything resolves to its case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTarget {
    Case(Uuid),
    Visit(Uuid),
    TreatmentPlan(Uuid),
}

impl AccessTarget {
    pub(crate) fn case(&self, conn: &Connection) -> Result<PatientCase, CoreError> {
        let case_id = match *self {
            Self::Case(id) => id,
            Self::Visit(id) => db::get_visit(conn, id)?.case_id,
            Self::TreatmentPlan(id) => db::get_treatment_plan(conn, id)?.case_id,
        };
        Ok(db::get_case(conn, case_id)?)
    }
}

fn patient_may(op: Operation) -> bool {
    matches!(
        op,
        Operation::ReadCase | Operation::ReadIntake | Operation::WriteIntake | Operation::WriteMessage
    )
}

fn doctor_may(op: Operation) -> bool {
    matches!(
        op,
        Operation::ReadCase
            | Operation::ReadIntake
            | Operation::WriteDiagnosis
            | Operation::WriteTreatmentPlan
            | Operation::WriteMessage
            | Operation::AddNote
    )
}

fn coordinator_may(op: Operation) -> bool {
    matches!(
        op,
        Operation::ReadCase
            | Operation::ReadIntake
            | Operation::Tag
            | Operation::ChangeProvider
            | Operation::AddNote
            | Operation::WriteMessage
    )
}

/// Decide whether the request's actor may perform `op` on `case`.
pub(crate) fn authorize(
    conn: &Connection,
    ctx: &RequestContext,
    op: Operation,
    case: &PatientCase,
) -> Result<AccessDecision, CoreError> {
    let decision = |basis| AccessDecision {
        case_id: case.id,
        operation: op,
        basis,
    };
    let refuse = || {
        tracing::debug!(
            actor = %ctx.actor.account_id,
            role = %ctx.actor.role,
            case = %case.id,
            operation = ?op,
            "access refused"
        );
        CoreError::denied(format!("{} may not {op:?} on this case", ctx.actor.role))
    };

    match ctx.actor.role {
        Role::Admin => Ok(decision(AccessBasis::Admin)),
        Role::Patient => {
            let owns = ctx
                .patient(conn)?
                .is_some_and(|p| p.id == case.patient_id);
            if owns && patient_may(op) {
                Ok(decision(AccessBasis::Owner))
            } else {
                Err(refuse())
            }
        }
        Role::Doctor => {
            if doctor_may(op)
                && db::has_active_assignment(conn, case.id, ctx.actor.account_id, ProviderRole::Doctor)?
            {
                Ok(decision(AccessBasis::Assignment))
            } else {
                Err(refuse())
            }
        }
        Role::CareCoordinator => {
            if coordinator_may(op) {
                Ok(decision(AccessBasis::CareCoordinator))
            } else {
                Err(refuse())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    fn check(fx: &Fixture, ctx: &RequestContext, op: Operation) -> Result<AccessDecision, CoreError> {
        fx.core.store().read(|conn| {
            let case = db::get_case(conn, fx.case_id)?;
            authorize(conn, ctx, op, &case)
        })
    }

    #[test]
    fn patient_owns_only_their_case() {
        let fx = Fixture::with_open_visit();
        let owner = fx.patient_ctx();
        assert_eq!(check(&fx, &owner, Operation::WriteIntake).unwrap().basis, AccessBasis::Owner);
        assert!(check(&fx, &owner, Operation::WriteDiagnosis).is_err());
        assert!(check(&fx, &fx.other_patient_ctx(), Operation::ReadCase).is_err());
    }

    #[test]
    fn doctor_needs_assignment_and_never_writes_intake() {
        let fx = Fixture::with_routed_visit();
        let doctor = fx.doctor_ctx();
        assert!(check(&fx, &doctor, Operation::ReadIntake).is_err());

        fx.core.claim_case(&doctor, fx.case_id).unwrap();
        assert_eq!(
            check(&fx, &doctor, Operation::WriteTreatmentPlan).unwrap().basis,
            AccessBasis::Assignment
        );
        assert!(check(&fx, &doctor, Operation::WriteIntake).is_err());
        assert!(check(&fx, &doctor, Operation::Tag).is_err());
    }

    #[test]
    fn coordinator_is_read_only_plus_admin_ops() {
        let fx = Fixture::with_open_visit();
        let cc = fx.cc_ctx();
        assert!(check(&fx, &cc, Operation::ReadIntake).is_ok());
        assert!(check(&fx, &cc, Operation::Tag).is_ok());
        assert!(check(&fx, &cc, Operation::ChangeProvider).is_ok());
        assert!(check(&fx, &cc, Operation::WriteDiagnosis).is_err());
        assert!(check(&fx, &cc, Operation::WriteIntake).is_err());
    }

    #[test]
    fn admin_may_do_anything() {
        let fx = Fixture::with_open_visit();
        let admin = crate::test_support::admin_ctx();
        assert_eq!(check(&fx, &admin, Operation::WriteDiagnosis).unwrap().basis, AccessBasis::Admin);
    }

    #[test]
    fn targets_resolve_to_their_case() {
        let fx = Fixture::with_open_visit();
        let case = fx
            .core
            .store()
            .read(|conn| AccessTarget::Visit(fx.visit_id).case(conn))
            .unwrap();
        assert_eq!(case.id, fx.case_id);
    }
}
