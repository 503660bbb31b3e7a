use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Role {
    Patient => "patient",
    Doctor => "doctor",
    CareCoordinator => "care_coordinator",
    Admin => "admin",
});

str_enum!(ProviderRole {
    Doctor => "doctor",
    CareCoordinator => "care_coordinator",
});

str_enum!(PathwayStatus {
    Active => "active",
    Deprecated => "deprecated",
});

str_enum!(Platform {
    Ios => "ios",
    Android => "android",
    Web => "web",
});

str_enum!(LayoutPurpose {
    Intake => "intake",
    Review => "review",
    Diagnose => "diagnose",
    DiagnosisDetail => "diagnosis_detail",
});

str_enum!(LayoutVariant {
    Initial => "initial",
    Followup => "followup",
});

str_enum!(LayoutRole {
    Patient => "patient",
    Doctor => "doctor",
});

str_enum!(LayoutStatus {
    Pending => "pending",
    Active => "active",
    Inactive => "inactive",
});

str_enum!(CaseStatus {
    Open => "open",
    Active => "active",
    Inactive => "inactive",
    PreSubmissionTriage => "pre_submission_triage",
    Triaged => "triaged",
    Deleted => "deleted",
});

str_enum!(VisitStatus {
    Open => "open",
    Submitted => "submitted",
    Charged => "charged",
    Routed => "routed",
    Reviewing => "reviewing",
    Treated => "treated",
    Triaged => "triaged",
    Deleted => "deleted",
});

impl VisitStatus {
    /// States in which a visit blocks another visit from opening in the same case.
    pub const IN_FLIGHT: [VisitStatus; 5] = [
        Self::Open,
        Self::Submitted,
        Self::Charged,
        Self::Routed,
        Self::Reviewing,
    ];

    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Treated | Self::Triaged | Self::Deleted)
    }
}

impl CaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Triaged | Self::Deleted)
    }
}

str_enum!(AnswerContext {
    Visit => "visit",
    DiagnosisItem => "diagnosis_item",
});

str_enum!(RecordStatus {
    Active => "active",
    Inactive => "inactive",
});

str_enum!(QuestionType {
    SingleSelect => "q_type_single_select",
    SegmentedControl => "q_type_segmented_control",
    MultipleChoice => "q_type_multiple_choice",
    Autocomplete => "q_type_autocomplete",
    FreeText => "q_type_free_text",
    SingleEntry => "q_type_single_entry",
    PhotoSection => "q_type_photo_section",
});

str_enum!(TreatmentPlanStatus {
    Draft => "draft",
    Submitted => "submitted",
    RxStarted => "rx_started",
    Active => "active",
    Inactive => "inactive",
});

str_enum!(ParentType {
    Visit => "visit",
    TreatmentPlan => "treatment_plan",
});

str_enum!(QueueStatus {
    Unclaimed => "unclaimed",
    Claimed => "claimed",
    Removed => "removed",
});

str_enum!(MessageStatus {
    Scheduled => "scheduled",
    Sent => "sent",
    Error => "error",
    Deactivated => "deactivated",
});

str_enum!(DeliveryStatus {
    Delivered => "delivered",
    Failed => "failed",
    Abandoned => "abandoned",
});
