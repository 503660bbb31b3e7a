use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisSet {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub doctor_id: Uuid,
    pub notes: Option<String>,
    pub unsuitable: bool,
    pub unsuitable_reason: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisItem {
    pub id: Uuid,
    pub set_id: Uuid,
    pub code_id: String,
    pub detail_layout_id: Option<Uuid>,
    pub position: i64,
}

/// Catalog entry describing a diagnosis code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisCode {
    pub code_id: String,
    pub name: String,
}
