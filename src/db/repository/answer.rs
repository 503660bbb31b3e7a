use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{enum_col, json_col, opt_uuid_col, to_json, uuid_col, DatabaseError};
use crate::models::enums::{AnswerContext, RecordStatus, Role};
use crate::models::AnswerRecord;

const ANSWER_COLUMNS: &str = "id, context_type, context_id, question_id, question_tag, actor_role,
     actor_account_id, session_id, session_counter, layout_version_id, parent_answer_id,
     parent_selection_id, payload, status, prefilled, created_at";

fn answer_from_row(row: &Row<'_>) -> rusqlite::Result<AnswerRecord> {
    Ok(AnswerRecord {
        id: uuid_col(row, 0)?,
        context: enum_col(row, 1)?,
        context_id: uuid_col(row, 2)?,
        question_id: row.get(3)?,
        question_tag: row.get(4)?,
        actor_role: enum_col(row, 5)?,
        actor_account_id: uuid_col(row, 6)?,
        session_id: row.get(7)?,
        session_counter: row.get(8)?,
        layout_version_id: uuid_col(row, 9)?,
        parent_answer_id: opt_uuid_col(row, 10)?,
        parent_selection_id: row.get(11)?,
        payload: json_col(row, 12)?,
        status: enum_col(row, 13)?,
        prefilled: row.get(14)?,
        created_at: row.get(15)?,
    })
}

pub fn insert_answer(conn: &Connection, answer: &AnswerRecord) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO answers ({ANSWER_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        ),
        params![
            answer.id.to_string(),
            answer.context.as_str(),
            answer.context_id.to_string(),
            answer.question_id,
            answer.question_tag,
            answer.actor_role.as_str(),
            answer.actor_account_id.to_string(),
            answer.session_id,
            answer.session_counter,
            answer.layout_version_id.to_string(),
            answer.parent_answer_id.map(|id| id.to_string()),
            answer.parent_selection_id,
            to_json("answers.payload", &answer.payload)?,
            answer.status.as_str(),
            answer.prefilled,
            answer.created_at,
        ],
    )?;
    Ok(())
}

/// Deactivate the active top-level answers (and their sub-answers) for one
/// question. Returns the ids of the deactivated top-level rows.
pub fn deactivate_question_answers(
    conn: &Connection,
    context: AnswerContext,
    context_id: Uuid,
    question_id: i64,
    role: Role,
) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM answers
         WHERE context_type = ?1 AND context_id = ?2 AND question_id = ?3
           AND actor_role = ?4 AND status = 'active' AND parent_answer_id IS NULL",
    )?;
    let ids = stmt
        .query_map(
            params![context.as_str(), context_id.to_string(), question_id, role.as_str()],
            |row| uuid_col(row, 0),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    for id in &ids {
        deactivate_answer_tree(conn, *id)?;
    }
    Ok(ids)
}

fn deactivate_answer_tree(conn: &Connection, id: Uuid) -> Result<(), DatabaseError> {
    conn.execute(
        "WITH RECURSIVE tree(id) AS (
             SELECT ?1
             UNION ALL
             SELECT a.id FROM answers a JOIN tree t ON a.parent_answer_id = t.id
         )
         UPDATE answers SET status = 'inactive' WHERE id IN (SELECT id FROM tree)",
        params![id.to_string()],
    )?;
    Ok(())
}

/// Active top-level answers of one role in a context, ordered so the
/// canonical row for each question comes first.
pub fn active_answers(
    conn: &Connection,
    context: AnswerContext,
    context_id: Uuid,
    role: Role,
) -> Result<Vec<AnswerRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ANSWER_COLUMNS} FROM answers
         WHERE context_type = ?1 AND context_id = ?2 AND actor_role = ?3
           AND status = 'active' AND parent_answer_id IS NULL
         ORDER BY question_id, session_counter DESC, rowid DESC"
    ))?;
    let rows = stmt.query_map(
        params![context.as_str(), context_id.to_string(), role.as_str()],
        answer_from_row,
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn child_answers(conn: &Connection, parent_id: Uuid) -> Result<Vec<AnswerRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ANSWER_COLUMNS} FROM answers
         WHERE parent_answer_id = ?1 AND status = 'active'
         ORDER BY parent_selection_id, question_id, rowid"
    ))?;
    let rows = stmt.query_map(params![parent_id.to_string()], answer_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_answer(conn: &Connection, id: Uuid) -> Result<Option<AnswerRecord>, DatabaseError> {
    Ok(conn
        .query_row(
            &format!("SELECT {ANSWER_COLUMNS} FROM answers WHERE id = ?1"),
            params![id.to_string()],
            answer_from_row,
        )
        .optional()?)
}

/// Number of answer rows of any status (history included) for a question.
pub fn count_answer_rows(
    conn: &Connection,
    context: AnswerContext,
    context_id: Uuid,
    question_id: i64,
) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM answers
         WHERE context_type = ?1 AND context_id = ?2 AND question_id = ?3 AND parent_answer_id IS NULL",
        params![context.as_str(), context_id.to_string(), question_id],
        |row| row.get(0),
    )?)
}

// ── Session ordering ────────────────────────────────────────

pub fn session_max_counter(
    conn: &Connection,
    context: AnswerContext,
    context_id: Uuid,
    account_id: Uuid,
    session_id: &str,
) -> Result<Option<i64>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT max_counter FROM answer_sessions
             WHERE context_type = ?1 AND context_id = ?2 AND actor_account_id = ?3 AND session_id = ?4",
            params![context.as_str(), context_id.to_string(), account_id.to_string(), session_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Record `counter` as the newest accepted counter. Returns false when a
/// counter at or above it is already stored.
pub fn advance_session_counter(
    conn: &Connection,
    context: AnswerContext,
    context_id: Uuid,
    account_id: Uuid,
    session_id: &str,
    counter: i64,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT INTO answer_sessions (context_type, context_id, actor_account_id, session_id, max_counter)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (context_type, context_id, actor_account_id, session_id)
         DO UPDATE SET max_counter = excluded.max_counter
         WHERE excluded.max_counter > answer_sessions.max_counter",
        params![context.as_str(), context_id.to_string(), account_id.to_string(), session_id, counter],
    )?;
    Ok(changed == 1)
}

// ── Media claims ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaClaim {
    pub media_id: String,
    pub answer_id: Uuid,
    pub context_id: Uuid,
    pub question_id: i64,
}

pub fn get_media_claim(conn: &Connection, media_id: &str) -> Result<Option<MediaClaim>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT media_id, answer_id, context_id, question_id FROM media_claims WHERE media_id = ?1",
            params![media_id],
            |row| {
                Ok(MediaClaim {
                    media_id: row.get(0)?,
                    answer_id: uuid_col(row, 1)?,
                    context_id: uuid_col(row, 2)?,
                    question_id: row.get(3)?,
                })
            },
        )
        .optional()?)
}

pub fn upsert_media_claim(
    conn: &Connection,
    claim: &MediaClaim,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO media_claims (media_id, answer_id, context_id, question_id, claimed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (media_id) DO UPDATE SET
             answer_id = excluded.answer_id,
             context_id = excluded.context_id,
             question_id = excluded.question_id,
             claimed_at = excluded.claimed_at",
        params![
            claim.media_id,
            claim.answer_id.to_string(),
            claim.context_id.to_string(),
            claim.question_id,
            at,
        ],
    )?;
    Ok(())
}

/// Current status of an answer row.
pub fn answer_status(conn: &Connection, id: Uuid) -> Result<Option<RecordStatus>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT status FROM answers WHERE id = ?1",
            params![id.to_string()],
            |row| enum_col(row, 0),
        )
        .optional()?)
}
