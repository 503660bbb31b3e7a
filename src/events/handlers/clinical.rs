//! Follow-through on doctor decisions.

use serde_json::json;
use uuid::Uuid;

use super::{schedule_message, MessageRequest};
use crate::db;
use crate::events::{CoreEvent, EventHandler, HandlerEnv, HandlerError};
use crate::models::enums::{MessageStatus, QueueStatus};
use crate::models::CaseNote;

/// Takes an unsuitable visit off the queue and leaves the reason for the care team.
pub struct UnsuitableTriage;

impl EventHandler for UnsuitableTriage {
    fn name(&self) -> &str {
        "unsuitable_triage"
    }

    fn handle(&self, env: &HandlerEnv<'_>, event: &CoreEvent) -> Result<(), HandlerError> {
        let CoreEvent::VisitMarkedUnsuitable { visit_id, case_id, doctor_id, reason, .. } = event else {
            return Ok(());
        };
        if let Some(item) = db::get_queue_item(env.conn, *case_id)? {
            if item.status != QueueStatus::Removed {
                db::set_queue_status(env.conn, *case_id, QueueStatus::Removed, None, env.now)?;
            }
        }
        db::insert_note(
            env.conn,
            &CaseNote {
                id: Uuid::new_v4(),
                case_id: *case_id,
                author_id: Some(*doctor_id),
                internal: true,
                text: format!("Visit marked unsuitable: {reason}"),
                created_at: env.now,
            },
        )?;
        tracing::info!(visit = %visit_id, case = %case_id, "unsuitable visit triaged");
        Ok(())
    }
}

/// Keeps the per-visit list of diagnosed codes current.
pub struct DiagnosisSummary;

impl EventHandler for DiagnosisSummary {
    fn name(&self) -> &str {
        "diagnosis_summary"
    }

    fn handle(&self, env: &HandlerEnv<'_>, event: &CoreEvent) -> Result<(), HandlerError> {
        let CoreEvent::DiagnosisModified { visit_id, .. } = event else {
            return Ok(());
        };
        let codes: Vec<String> = match db::active_set_for_visit(env.conn, *visit_id)? {
            Some(set) => db::items_for_set(env.conn, set.id)?
                .into_iter()
                .map(|item| item.code_id)
                .collect(),
            None => Vec::new(),
        };
        db::upsert_diagnosis_summary(env.conn, *visit_id, &codes, env.now)?;
        Ok(())
    }
}

pub const TREATMENT_PLAN_READY: &str = "treatment_plan_ready";

/// Tells the patient their plan is ready. A still-pending notice is not duplicated.
pub struct TreatmentPlanReady;

impl EventHandler for TreatmentPlanReady {
    fn name(&self) -> &str {
        TREATMENT_PLAN_READY
    }

    fn handle(&self, env: &HandlerEnv<'_>, event: &CoreEvent) -> Result<(), HandlerError> {
        let CoreEvent::TreatmentPlanSubmitted { treatment_plan_id, case_id, doctor_id, at, .. } = event else {
            return Ok(());
        };
        if db::count_messages(env.conn, *case_id, TREATMENT_PLAN_READY, &[MessageStatus::Scheduled])? > 0 {
            tracing::debug!(case = %case_id, "treatment plan notice already pending");
            return Ok(());
        }
        let case = db::get_case(env.conn, *case_id)?;
        let patient = db::get_patient(env.conn, case.patient_id)?;
        schedule_message(
            env.conn,
            MessageRequest {
                event_type: TREATMENT_PLAN_READY,
                template_id: TREATMENT_PLAN_READY,
                case_id: *case_id,
                person_id: patient.id,
                scheduled_at: *at + env.config.treatment_plan_message_delay,
                data: json!({
                    "first_name": patient.first_name,
                    "treatment_plan_id": treatment_plan_id,
                    "doctor_id": doctor_id,
                }),
            },
            env.now,
        )?;
        Ok(())
    }
}
