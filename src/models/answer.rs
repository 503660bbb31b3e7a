use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AnswerContext, RecordStatus, Role};

/// A selected potential answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub potential_answer_id: i64,
    pub answer_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSlot {
    pub slot_name: String,
    pub blob_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSection {
    pub name: String,
    pub slots: Vec<PhotoSlot>,
}

/// Typed answer value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerPayload {
    Scalar { selection: Selection },
    MultiSelect { selections: Vec<Selection> },
    FreeText { text: String },
    SingleEntry { text: String },
    PhotoSection { sections: Vec<PhotoSection> },
}

impl AnswerPayload {
    /// Selections carried by choice-style answers.
    pub fn selections(&self) -> Vec<&Selection> {
        match self {
            Self::Scalar { selection } => vec![selection],
            Self::MultiSelect { selections } => selections.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn media_ids(&self) -> Vec<&str> {
        match self {
            Self::PhotoSection { sections } => sections
                .iter()
                .flat_map(|s| s.slots.iter().map(|slot| slot.blob_id.as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Stored answer row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub id: Uuid,
    pub context: AnswerContext,
    pub context_id: Uuid,
    pub question_id: i64,
    pub question_tag: String,
    pub actor_role: Role,
    pub actor_account_id: Uuid,
    pub session_id: String,
    pub session_counter: i64,
    pub layout_version_id: Uuid,
    pub parent_answer_id: Option<Uuid>,
    /// Potential answer of the parent that this sub-answer hangs off.
    pub parent_selection_id: Option<i64>,
    pub payload: AnswerPayload,
    pub status: RecordStatus,
    pub prefilled: bool,
    pub created_at: DateTime<Utc>,
}
