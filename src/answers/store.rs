//! Answer persistence: session ordering, rewrites, sub-answer trees, media claims.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::convert::ConvertedAnswer;
use super::AnswerView;
use crate::context::Actor;
use crate::db::{self, MediaClaim};
use crate::error::{CoreError, StateConflict};
use crate::models::enums::{AnswerContext, RecordStatus, Role};
use crate::models::AnswerRecord;

/// Where and as whom a batch of answers is written.
#[derive(Debug, Clone)]
pub(crate) struct WriteScope<'a> {
    pub context: AnswerContext,
    pub context_id: Uuid,
    pub actor: Actor,
    pub session_id: &'a str,
    pub counter: i64,
    pub layout_version_id: Uuid,
    pub at: DateTime<Utc>,
}

/// Accept `counter` for the session or refuse the whole batch.
pub(crate) fn claim_session_slot(conn: &Connection, scope: &WriteScope<'_>) -> Result<(), CoreError> {
    if scope.session_id.trim().is_empty() {
        return Err(CoreError::missing("session_id"));
    }
    if scope.counter < 0 {
        return Err(CoreError::out_of_range("session counter must not be negative"));
    }

    let out_of_order = |last: i64| {
        CoreError::StateConflict(StateConflict::SessionOutOfOrder {
            session_id: scope.session_id.to_string(),
            counter: scope.counter,
            last,
        })
    };

    let last = db::session_max_counter(
        conn,
        scope.context,
        scope.context_id,
        scope.actor.account_id,
        scope.session_id,
    )?;
    if let Some(last) = last.filter(|last| scope.counter <= *last) {
        return Err(out_of_order(last));
    }
    if !db::advance_session_counter(
        conn,
        scope.context,
        scope.context_id,
        scope.actor.account_id,
        scope.session_id,
        scope.counter,
    )? {
        return Err(out_of_order(last.unwrap_or(scope.counter)));
    }
    Ok(())
}

/// Replace the actor role's answer to one question. Returns the new row id.
pub(crate) fn persist(
    conn: &Connection,
    scope: &WriteScope<'_>,
    answer: &ConvertedAnswer<'_>,
) -> Result<Uuid, CoreError> {
    let replaced = db::deactivate_question_answers(
        conn,
        scope.context,
        scope.context_id,
        answer.question.question_id,
        scope.actor.role,
    )?;
    if !replaced.is_empty() {
        tracing::debug!(
            question = answer.question.question_id,
            replaced = replaced.len(),
            "previous answers deactivated"
        );
    }
    insert_tree(conn, scope, answer, None)
}

fn insert_tree(
    conn: &Connection,
    scope: &WriteScope<'_>,
    answer: &ConvertedAnswer<'_>,
    parent: Option<(Uuid, i64)>,
) -> Result<Uuid, CoreError> {
    let id = Uuid::new_v4();
    db::insert_answer(
        conn,
        &AnswerRecord {
            id,
            context: scope.context,
            context_id: scope.context_id,
            question_id: answer.question.question_id,
            question_tag: answer.question.question_tag.clone(),
            actor_role: scope.actor.role,
            actor_account_id: scope.actor.account_id,
            session_id: scope.session_id.to_string(),
            session_counter: scope.counter,
            layout_version_id: scope.layout_version_id,
            parent_answer_id: parent.map(|(pid, _)| pid),
            parent_selection_id: parent.map(|(_, sel)| sel),
            payload: answer.payload.clone(),
            status: RecordStatus::Active,
            prefilled: false,
            created_at: scope.at,
        },
    )?;

    for media_id in answer.payload.media_ids() {
        claim_media(conn, scope, answer.question.question_id, id, media_id)?;
    }
    for (selection_id, child) in &answer.children {
        insert_tree(conn, scope, child, Some((id, *selection_id)))?;
    }
    Ok(id)
}

/// A blob belongs to at most one live answer. Re-answering the same question
/// in the same context takes the claim over.
fn claim_media(
    conn: &Connection,
    scope: &WriteScope<'_>,
    question_id: i64,
    answer_id: Uuid,
    media_id: &str,
) -> Result<(), CoreError> {
    if let Some(existing) = db::get_media_claim(conn, media_id)? {
        let same_slot = existing.context_id == scope.context_id && existing.question_id == question_id;
        let live = db::answer_status(conn, existing.answer_id)? == Some(RecordStatus::Active);
        if !same_slot && live {
            return Err(CoreError::StateConflict(StateConflict::ClaimerConflict {
                media_id: media_id.to_string(),
            }));
        }
    }
    db::upsert_media_claim(
        conn,
        &MediaClaim {
            media_id: media_id.to_string(),
            answer_id,
            context_id: scope.context_id,
            question_id,
        },
        scope.at,
    )?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Reads
// ═══════════════════════════════════════════════════════════

/// Canonical top-level answer per question: the highest counter among active rows.
pub(crate) fn canonical_answers(
    conn: &Connection,
    context: AnswerContext,
    context_id: Uuid,
    role: Role,
) -> Result<Vec<AnswerRecord>, CoreError> {
    let mut seen = HashSet::new();
    Ok(db::active_answers(conn, context, context_id, role)?
        .into_iter()
        .filter(|a| seen.insert(a.question_id))
        .collect())
}

pub(crate) fn view(conn: &Connection, record: AnswerRecord) -> Result<AnswerView, CoreError> {
    let sub_answers = db::child_answers(conn, record.id)?
        .into_iter()
        .map(|child| view(conn, child))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AnswerView {
        answer_id: record.id,
        question_id: record.question_id,
        question_tag: record.question_tag,
        payload: record.payload,
        prefilled: record.prefilled,
        session_counter: record.session_counter,
        parent_selection_id: record.parent_selection_id,
        sub_answers,
    })
}

/// Canonical patient answers with the given tags on the case's most recent
/// treated visit.
pub fn answers_for_prefill(
    conn: &Connection,
    case_id: Uuid,
    tags: &[&str],
) -> Result<Vec<AnswerRecord>, CoreError> {
    let Some(visit) = db::latest_treated_visit(conn, case_id)? else {
        return Ok(Vec::new());
    };
    Ok(canonical_answers(conn, AnswerContext::Visit, visit.id, Role::Patient)?
        .into_iter()
        .filter(|a| tags.contains(&a.question_tag.as_str()))
        .collect())
}
