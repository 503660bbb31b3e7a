use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{enum_col, uuid_col, DatabaseError};
use crate::models::enums::ProviderRole;
use crate::models::*;

pub fn insert_pathway(conn: &Connection, pathway: &Pathway) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO pathways (tag, name, status) VALUES (?1, ?2, ?3)",
        params![pathway.tag, pathway.name, pathway.status.as_str()],
    )?;
    Ok(())
}

pub fn get_pathway(conn: &Connection, tag: &str) -> Result<Option<Pathway>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT tag, name, status FROM pathways WHERE tag = ?1",
            params![tag],
            |row| {
                Ok(Pathway {
                    tag: row.get(0)?,
                    name: row.get(1)?,
                    status: enum_col(row, 2)?,
                })
            },
        )
        .optional()?)
}

pub fn insert_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, account_id, first_name, date_of_birth) VALUES (?1, ?2, ?3, ?4)",
        params![
            patient.id.to_string(),
            patient.account_id.to_string(),
            patient.first_name,
            patient.date_of_birth,
        ],
    )?;
    Ok(())
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: uuid_col(row, 0)?,
        account_id: uuid_col(row, 1)?,
        first_name: row.get(2)?,
        date_of_birth: row.get(3)?,
    })
}

pub fn get_patient(conn: &Connection, id: Uuid) -> Result<Patient, DatabaseError> {
    conn.query_row(
        "SELECT id, account_id, first_name, date_of_birth FROM patients WHERE id = ?1",
        params![id.to_string()],
        patient_from_row,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("patient", id))
}

pub fn get_patient_by_account(
    conn: &Connection,
    account_id: Uuid,
) -> Result<Option<Patient>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id, account_id, first_name, date_of_birth FROM patients WHERE account_id = ?1",
            params![account_id.to_string()],
            patient_from_row,
        )
        .optional()?)
}

pub fn insert_provider(conn: &Connection, provider: &Provider) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO providers (account_id, role, display_name) VALUES (?1, ?2, ?3)",
        params![
            provider.account_id.to_string(),
            provider.role.as_str(),
            provider.display_name,
        ],
    )?;
    Ok(())
}

pub fn get_provider(conn: &Connection, account_id: Uuid) -> Result<Option<Provider>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT account_id, role, display_name FROM providers WHERE account_id = ?1",
            params![account_id.to_string()],
            |row| {
                Ok(Provider {
                    account_id: uuid_col(row, 0)?,
                    role: enum_col(row, 1)?,
                    display_name: row.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn add_provider_pathway(
    conn: &Connection,
    provider_id: Uuid,
    pathway_tag: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO provider_pathways (provider_id, pathway_tag) VALUES (?1, ?2)",
        params![provider_id.to_string(), pathway_tag],
    )?;
    Ok(())
}

/// Whether the provider holds `role` and is registered for the pathway.
pub fn is_provider_eligible(
    conn: &Connection,
    provider_id: Uuid,
    role: ProviderRole,
    pathway_tag: &str,
) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM providers p
         JOIN provider_pathways pp ON pp.provider_id = p.account_id
         WHERE p.account_id = ?1 AND p.role = ?2 AND pp.pathway_tag = ?3",
        params![provider_id.to_string(), role.as_str(), pathway_tag],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Pathways a provider may work in.
pub fn provider_pathways(conn: &Connection, provider_id: Uuid) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT pathway_tag FROM provider_pathways WHERE provider_id = ?1 ORDER BY pathway_tag",
    )?;
    let rows = stmt.query_map(params![provider_id.to_string()], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}
