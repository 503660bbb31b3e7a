use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{CaseStatus, VisitStatus};

/// Longitudinal container for a patient's care in one pathway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientCase {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub pathway_tag: String,
    pub status: CaseStatus,
    pub claimed: bool,
    pub created_at: DateTime<Utc>,
}

/// One intake-review-treatment cycle within a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientVisit {
    pub id: Uuid,
    pub case_id: Uuid,
    pub pathway_tag: String,
    pub status: VisitStatus,
    pub sku_type: String,
    pub is_followup: bool,
    pub parent_visit_id: Option<Uuid>,
    pub intake_layout_id: Uuid,
    pub review_layout_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub treated_at: Option<DateTime<Utc>>,
}
