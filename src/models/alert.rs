use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::MessageStatus;

/// Clinician-facing flag raised on a case or visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub case_id: Uuid,
    pub visit_id: Option<Uuid>,
    pub question_id: Option<i64>,
    pub message: String,
    pub dismissable: bool,
    pub created_at: DateTime<Utc>,
    pub dismissed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseTag {
    pub tag: String,
    pub case_id: Uuid,
    pub trigger_time: Option<DateTime<Utc>>,
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub id: Uuid,
    pub event_type: String,
    pub case_id: Uuid,
    pub person_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub template_id: String,
    pub data: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseNote {
    pub id: Uuid,
    pub case_id: Uuid,
    pub author_id: Option<Uuid>,
    pub internal: bool,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
