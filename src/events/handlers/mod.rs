//! Built-in subscribers.

mod alerts;
mod clinical;
mod insurance;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

pub use alerts::VisitAlerts;
pub use clinical::{DiagnosisSummary, TreatmentPlanReady, UnsuitableTriage};
pub use insurance::{Coverage, InsuranceMessage, InsuranceTagging, INSURANCE_QUESTION_TAG};

use super::{EventHandler, HandlerError};
use crate::db;
use crate::models::enums::MessageStatus;
use crate::models::ScheduledMessage;

/// Registration order is dispatch order.
pub fn builtin() -> Vec<Arc<dyn EventHandler>> {
    vec![
        Arc::new(InsuranceTagging),
        Arc::new(InsuranceMessage),
        Arc::new(VisitAlerts),
        Arc::new(UnsuitableTriage),
        Arc::new(DiagnosisSummary),
        Arc::new(TreatmentPlanReady),
    ]
}

/// A message for the external delivery sweeper.
pub(crate) struct MessageRequest<'a> {
    pub event_type: &'a str,
    pub template_id: &'a str,
    pub case_id: Uuid,
    pub person_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

pub(crate) fn schedule_message(
    conn: &Connection,
    request: MessageRequest<'_>,
    now: DateTime<Utc>,
) -> Result<ScheduledMessage, HandlerError> {
    let message = ScheduledMessage {
        id: Uuid::new_v4(),
        event_type: request.event_type.to_string(),
        case_id: request.case_id,
        person_id: request.person_id,
        scheduled_at: request.scheduled_at,
        status: MessageStatus::Scheduled,
        template_id: request.template_id.to_string(),
        data: request.data,
        error: None,
        created_at: now,
        completed_at: None,
    };
    db::insert_message(conn, &message)?;
    tracing::info!(
        message = %message.id,
        case = %message.case_id,
        template = %message.template_id,
        at = %message.scheduled_at,
        "message scheduled"
    );
    Ok(message)
}
