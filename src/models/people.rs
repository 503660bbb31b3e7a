use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{PathwayStatus, ProviderRole};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pathway {
    pub tag: String,
    pub name: String,
    pub status: PathwayStatus,
}

/// Patient profile as mirrored into the workflow store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub account_id: Uuid,
    pub first_name: String,
    pub date_of_birth: NaiveDate,
}

impl Patient {
    /// Age in whole years on `today`.
    pub fn age_on(&self, today: NaiveDate) -> u32 {
        today.years_since(self.date_of_birth).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub account_id: Uuid,
    pub role: ProviderRole,
    pub display_name: String,
}
