use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ParentType, TreatmentPlanStatus};

/// Clinical content keyed by section name (treatments, regimen, resource_guides, note, ...).
pub type PlanSections = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: ParentType,
    pub id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSource {
    pub favorite_id: Uuid,
    pub deviated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentPlan {
    pub id: Uuid,
    pub case_id: Uuid,
    pub visit_id: Uuid,
    pub doctor_id: Uuid,
    pub status: TreatmentPlanStatus,
    pub parent: ParentRef,
    pub content_source: Option<ContentSource>,
    pub content: PlanSections,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub viewed: bool,
}

/// Doctor-owned template a draft can start from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteTreatmentPlan {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub pathway_tag: String,
    pub name: String,
    pub content: PlanSections,
    pub created_at: DateTime<Utc>,
}
