pub mod repository;
pub mod sqlite;

pub use repository::*;
pub use sqlite::*;

use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::Row;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: &'static str, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("Corrupt JSON column {column}: {reason}")]
    CorruptJson { column: &'static str, reason: String },
}

impl DatabaseError {
    pub fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity_type, id: id.to_string() }
    }
}

// ── Row helpers ─────────────────────────────────────────────

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read a TEXT column holding a UUID.
pub fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Uuid::parse_str(&raw)
            .map(Some)
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

/// Read a TEXT column holding a `str_enum!` value.
pub fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = DatabaseError>,
{
    let raw: String = row.get(idx)?;
    T::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

/// Read a TEXT column holding JSON.
pub fn json_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

/// Serialize a value for a JSON column.
pub fn to_json<T: serde::Serialize>(
    column: &'static str,
    value: &T,
) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::CorruptJson {
        column,
        reason: e.to_string(),
    })
}
