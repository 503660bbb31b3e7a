use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use super::DatabaseError;

/// Schema migrations in apply order. Each script records its own version.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../resources/migrations/001_initial.sql"))];

/// Open (or create) the workflow database at `path` and bring it up to date.
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(path)?;
    configure(&conn, "WAL")?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Migrated in-memory database for tests and demos.
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    let conn = Connection::open_in_memory()?;
    configure(&conn, "MEMORY")?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection, journal_mode: &str) -> Result<(), DatabaseError> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", journal_mode, |row| row.get(0))?;
    tracing::debug!(mode = %mode, "journal mode set");
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Apply every migration newer than the recorded schema version.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;
    for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        tracing::info!(version, "applying schema migration");
        conn.execute_batch(sql)
            .map_err(|e| DatabaseError::MigrationFailed { version, reason: e.to_string() })?;
    }
    Ok(())
}

/// Highest applied migration, 0 on a fresh database.
pub fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let has_table = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !has_table {
        return Ok(0);
    }
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn fresh_database_has_workflow_tables() {
        let conn = open_memory_database().unwrap();
        let tables = table_names(&conn);
        for expected in ["patient_cases", "patient_visits", "answers", "event_outbox", "treatment_plans"] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.len() as i64);
    }

    #[test]
    fn rerunning_migrations_is_a_no_op() {
        let conn = open_memory_database().unwrap();
        let before = table_names(&conn).len();
        run_migrations(&conn).unwrap();
        assert_eq!(table_names(&conn).len(), before);
    }

    #[test]
    fn empty_database_reports_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn foreign_keys_enabled() {
        let conn = open_memory_database().unwrap();
        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn file_database_persists_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("careline.db");
        {
            let conn = open_database(&path).unwrap();
            conn.execute(
                "INSERT INTO pathways (tag, name) VALUES ('health_condition_acne', 'Acne')",
                [],
            )
            .unwrap();
        }
        let conn = open_database(&path).unwrap();
        let name: String = conn
            .query_row("SELECT name FROM pathways", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "Acne");
    }
}
