use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ProviderRole, QueueStatus, RecordStatus};

/// One append-only assignment row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareTeamAssignment {
    pub seq: i64,
    pub case_id: Uuid,
    pub provider_id: Uuid,
    pub role: ProviderRole,
    pub status: RecordStatus,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub case_id: Uuid,
    pub visit_id: Uuid,
    pub pathway_tag: String,
    pub status: QueueStatus,
    pub claimed_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}
