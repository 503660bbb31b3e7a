//! Post-transition work: a durable outbox plus in-process subscribers.
//!
//! Operations call [`emit`] inside their own transaction, so an event exists
//! if and only if the transition committed. After commit the bus is poked;
//! the dispatcher (background task or [`CoreState::dispatch_pending`]) then
//! hands every outbox row to every subscriber in its own transaction and
//! records the outcome per (event, subscriber).
//!
//! [`CoreState::dispatch_pending`]: crate::core_state::CoreState::dispatch_pending

pub mod bus;
pub mod handlers;
pub mod worker;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use bus::{DispatchReport, EventBus};
pub use worker::{start_dispatcher, DispatcherHandle};

use crate::config::CoreConfig;
use crate::db::{self, DatabaseError};
use crate::error::CoreError;
use crate::layout::LayoutCache;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    VisitSubmitted {
        visit_id: Uuid,
        case_id: Uuid,
        patient_id: Uuid,
        at: DateTime<Utc>,
    },
    VisitMarkedUnsuitable {
        visit_id: Uuid,
        case_id: Uuid,
        doctor_id: Uuid,
        reason: String,
        at: DateTime<Utc>,
    },
    DiagnosisModified {
        visit_id: Uuid,
        case_id: Uuid,
        set_id: Uuid,
        doctor_id: Uuid,
        at: DateTime<Utc>,
    },
    TreatmentPlanSubmitted {
        treatment_plan_id: Uuid,
        visit_id: Uuid,
        case_id: Uuid,
        doctor_id: Uuid,
        at: DateTime<Utc>,
    },
}

impl CoreEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::VisitSubmitted { .. } => "visit_submitted",
            Self::VisitMarkedUnsuitable { .. } => "visit_marked_unsuitable",
            Self::DiagnosisModified { .. } => "diagnosis_modified",
            Self::TreatmentPlanSubmitted { .. } => "treatment_plan_submitted",
        }
    }

    pub fn case_id(&self) -> Uuid {
        match self {
            Self::VisitSubmitted { case_id, .. }
            | Self::VisitMarkedUnsuitable { case_id, .. }
            | Self::DiagnosisModified { case_id, .. }
            | Self::TreatmentPlanSubmitted { case_id, .. } => *case_id,
        }
    }

    pub fn visit_id(&self) -> Uuid {
        match self {
            Self::VisitSubmitted { visit_id, .. }
            | Self::VisitMarkedUnsuitable { visit_id, .. }
            | Self::DiagnosisModified { visit_id, .. }
            | Self::TreatmentPlanSubmitted { visit_id, .. } => *visit_id,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::VisitSubmitted { at, .. }
            | Self::VisitMarkedUnsuitable { at, .. }
            | Self::DiagnosisModified { at, .. }
            | Self::TreatmentPlanSubmitted { at, .. } => *at,
        }
    }
}

/// Append `event` to the outbox on the caller's transaction.
pub(crate) fn emit(conn: &Connection, event: &CoreEvent) -> Result<Uuid, CoreError> {
    let id = Uuid::new_v4();
    let payload = serde_json::to_string(event).map_err(CoreError::internal)?;
    let seq = db::insert_outbox_event(conn, id, event.event_type(), &payload, Utc::now())?;
    tracing::debug!(event = event.event_type(), %id, seq, case = %event.case_id(), "event queued");
    Ok(id)
}

// ═══════════════════════════════════════════════════════════
// Subscribers
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("Undecodable event payload: {0}")]
    Payload(String),

    #[error("Handler failed: {0}")]
    Failed(String),
}

/// What a handler gets to work with. `conn` is the delivery's own transaction.
pub struct HandlerEnv<'a> {
    pub conn: &'a Connection,
    pub config: &'a CoreConfig,
    pub layouts: &'a LayoutCache,
    pub now: DateTime<Utc>,
}

/// A registered subscriber. Handlers see every event and ignore the ones they
/// do not care about; returning an error rolls back only this delivery.
pub trait EventHandler: Send + Sync {
    /// Stable name; delivery records are keyed by it.
    fn name(&self) -> &str;

    fn handle(&self, env: &HandlerEnv<'_>, event: &CoreEvent) -> Result<(), HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_type_tag() {
        let event = CoreEvent::VisitMarkedUnsuitable {
            visit_id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            reason: "Not treatable".into(),
            at: Utc::now(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "visit_marked_unsuitable");
        assert_eq!(json["reason"], "Not treatable");
        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn emit_writes_outbox_row() {
        let conn = db::open_memory_database().unwrap();
        let event = CoreEvent::VisitSubmitted {
            visit_id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            at: Utc::now(),
        };
        emit(&conn, &event).unwrap();
        emit(&conn, &event).unwrap();
        assert_eq!(db::count_outbox(&conn).unwrap(), 2);
        let pending = db::pending_for_subscriber(&conn, "anyone", 10).unwrap();
        assert_eq!(pending[0].event_type, "visit_submitted");
        assert!(pending[0].seq < pending[1].seq);
    }
}
