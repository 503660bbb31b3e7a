//! Error taxonomy surfaced by every workflow operation.
//!
//! `CoreError` carries a `kind()` for callers that branch on category and a
//! stable `code()` string for the transport layer. Persistence failures come in
//! as `DatabaseError` and are mapped here; raw SQL text never leaves the crate.

use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AccessDenied,
    StateConflict,
    Conflict,
    Dependency,
    Internal,
    Cancelled,
}

/// Sub-codes for validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    InvalidRequest,
    MissingField,
    OutOfRange,
    UnknownQuestion,
    IncompleteVisit,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::MissingField => "missing_field",
            Self::OutOfRange => "out_of_range",
            Self::UnknownQuestion => "unknown_question",
            Self::IncompleteVisit => "incomplete_visit",
        }
    }
}

/// Why a state-dependent operation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateConflict {
    /// Session counter not greater than the last accepted one.
    SessionOutOfOrder { session_id: String, counter: i64, last: i64 },
    /// Question not part of the layout the entity is bound to.
    LayoutMismatch { question_id: i64 },
    /// Another doctor won the claim.
    AlreadyClaimed,
    /// Media blob already attached to a different answer.
    ClaimerConflict { media_id: String },
    /// Entity is not in a state that allows the transition.
    InvalidTransition { entity: &'static str, from: String, to: String },
    /// Case already has a visit in flight.
    VisitInFlight { visit_id: Uuid },
}

impl StateConflict {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionOutOfOrder { .. } => "session_out_of_order",
            Self::LayoutMismatch { .. } => "layout_mismatch",
            Self::AlreadyClaimed => "already_claimed",
            Self::ClaimerConflict { .. } => "claimer_conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::VisitInFlight { .. } => "visit_in_flight",
        }
    }
}

impl std::fmt::Display for StateConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionOutOfOrder { session_id, counter, last } => write!(
                f,
                "session {session_id} counter {counter} is not after {last}"
            ),
            Self::LayoutMismatch { question_id } => {
                write!(f, "question {question_id} is not part of the bound layout")
            }
            Self::AlreadyClaimed => write!(f, "case already claimed"),
            Self::ClaimerConflict { media_id } => {
                write!(f, "media {media_id} is already claimed by another answer")
            }
            Self::InvalidTransition { entity, from, to } => {
                write!(f, "{entity} cannot move from {from} to {to}")
            }
            Self::VisitInFlight { visit_id } => {
                write!(f, "visit {visit_id} is still in flight")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation failed ({}): {message}", .code.as_str())]
    Validation { code: ValidationCode, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("No active layout for {0}")]
    LayoutNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("State conflict: {0}")]
    StateConflict(StateConflict),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Dependency failure ({service}): {message}")]
    Dependency { service: &'static str, message: String },

    #[error("Internal error (ref {reference})")]
    Internal { reference: Uuid },

    #[error("Operation cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } | Self::LayoutNotFound(_) => ErrorKind::NotFound,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::StateConflict(_) => ErrorKind::StateConflict,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Dependency { .. } => ErrorKind::Dependency,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code.as_str(),
            Self::NotFound { .. } => "not_found",
            Self::LayoutNotFound(_) => "layout_not_found",
            Self::AccessDenied(_) => "access_denied",
            Self::StateConflict(c) => c.code(),
            Self::Conflict(_) => "conflict",
            Self::Dependency { .. } => "dependency",
            Self::Internal { .. } => "internal",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation { code: ValidationCode::InvalidRequest, message: message.into() }
    }

    pub fn missing(field: &str) -> Self {
        Self::Validation {
            code: ValidationCode::MissingField,
            message: format!("{field} is required"),
        }
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::Validation { code: ValidationCode::OutOfRange, message: message.into() }
    }

    pub fn unknown_question(question_id: i64) -> Self {
        Self::Validation {
            code: ValidationCode::UnknownQuestion,
            message: format!("question {question_id} does not exist"),
        }
    }

    pub fn incomplete_visit(message: impl Into<String>) -> Self {
        Self::Validation { code: ValidationCode::IncompleteVisit, message: message.into() }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::AccessDenied(message.into())
    }

    pub fn transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self::StateConflict(StateConflict::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    /// Log the underlying cause under a fresh reference id and hide it.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        let reference = Uuid::new_v4();
        tracing::error!(%reference, error = %cause, "internal error");
        Self::Internal { reference }
    }

    pub fn is_state_conflict(&self) -> bool {
        self.kind() == ErrorKind::StateConflict
    }
}

impl From<DatabaseError> for CoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, id } => Self::NotFound {
                entity: entity_type,
                id,
            },
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, msg))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                tracing::warn!(error = ?msg, "constraint violation");
                Self::Conflict("conflicting write".into())
            }
            DatabaseError::ConstraintViolation(msg) => Self::Conflict(msg),
            other => Self::internal(other),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        DatabaseError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::missing("pathway").code(), "missing_field");
        assert_eq!(CoreError::invalid("x").code(), "invalid_request");
        assert_eq!(CoreError::out_of_range("x").code(), "out_of_range");
        assert_eq!(CoreError::unknown_question(4).code(), "unknown_question");
        assert_eq!(
            CoreError::StateConflict(StateConflict::AlreadyClaimed).code(),
            "already_claimed"
        );
        assert_eq!(CoreError::LayoutNotFound("acne".into()).code(), "layout_not_found");
    }

    #[test]
    fn kinds_group_codes() {
        assert_eq!(CoreError::incomplete_visit("x").kind(), ErrorKind::Validation);
        assert_eq!(CoreError::LayoutNotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            CoreError::transition("visit", "open", "treated").kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(CoreError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn database_not_found_maps_to_not_found() {
        let err: CoreError = DatabaseError::NotFound {
            entity_type: "visit",
            id: "abc".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("visit"));
    }

    #[test]
    fn internal_hides_cause() {
        let err = CoreError::internal("near \"SELEC\": syntax error");
        assert!(!err.to_string().contains("SELEC"));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn constraint_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err();
        let core: CoreError = err.into();
        assert_eq!(core.kind(), ErrorKind::Conflict);
    }
}
