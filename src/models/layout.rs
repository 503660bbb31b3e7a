use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{LayoutPurpose, LayoutRole, LayoutStatus, LayoutVariant, Platform};
use crate::compat::{AppVersion, VersionRange};

/// Stored layout version. `payload` is the raw JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutVersion {
    pub id: Uuid,
    pub pathway_tag: String,
    pub purpose: LayoutPurpose,
    pub variant: LayoutVariant,
    pub role: LayoutRole,
    pub platform: Platform,
    pub version: AppVersion,
    pub app_range: VersionRange,
    pub diagnosis_code: Option<String>,
    pub sku_type: String,
    pub status: LayoutStatus,
    pub checksum: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// Selection bucket; activation is exclusive within one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutBucket {
    pub pathway_tag: String,
    pub purpose: LayoutPurpose,
    pub variant: LayoutVariant,
    pub role: LayoutRole,
    pub platform: Platform,
    pub diagnosis_code: Option<String>,
}

impl LayoutVersion {
    pub fn bucket(&self) -> LayoutBucket {
        LayoutBucket {
            pathway_tag: self.pathway_tag.clone(),
            purpose: self.purpose,
            variant: self.variant,
            role: self.role,
            platform: self.platform,
            diagnosis_code: self.diagnosis_code.clone(),
        }
    }
}
