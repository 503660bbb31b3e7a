//! Carry answers from the last treated visit into a new visit.
//!
//! Questions flagged `prefilled_with_previous_answers` are matched by tag.
//! Choice answers are re-mapped onto the new layout by answer tag, since
//! potential-answer ids are layout-local.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::document::{LayoutDocument, Question};
use crate::answers;
use crate::db;
use crate::error::CoreError;
use crate::models::enums::{AnswerContext, QuestionType, RecordStatus, Role};
use crate::models::{AnswerPayload, AnswerRecord, PatientVisit, Selection};

/// Tags of the questions that want previous answers.
pub fn prefill_tags(doc: &LayoutDocument) -> Vec<&str> {
    doc.questions()
        .filter(|q| q.prefilled_with_previous_answers)
        .map(|q| q.question_tag.as_str())
        .collect()
}

/// Translate a stored payload onto `target`. `None` when nothing survives.
pub fn remap_payload(payload: &AnswerPayload, target: &Question) -> Option<AnswerPayload> {
    let remap = |s: &Selection| -> Option<Selection> {
        if s.potential_answer_id == 0 {
            // Free autocomplete entry, no layout answer behind it.
            return Some(s.clone());
        }
        target.potential_answer_by_tag(&s.answer_tag).map(|pa| Selection {
            potential_answer_id: pa.answer_id,
            answer_tag: pa.answer_tag.clone(),
            answer_text: s.answer_text.clone(),
        })
    };

    match (payload, target.question_type) {
        (
            AnswerPayload::Scalar { selection },
            QuestionType::SingleSelect | QuestionType::SegmentedControl,
        ) => remap(selection).map(|selection| AnswerPayload::Scalar { selection }),
        (
            AnswerPayload::MultiSelect { selections },
            QuestionType::MultipleChoice | QuestionType::Autocomplete,
        ) => {
            let selections: Vec<Selection> = selections.iter().filter_map(remap).collect();
            (!selections.is_empty()).then_some(AnswerPayload::MultiSelect { selections })
        }
        (AnswerPayload::FreeText { text }, QuestionType::FreeText) => {
            Some(AnswerPayload::FreeText { text: text.clone() })
        }
        (AnswerPayload::SingleEntry { text }, QuestionType::SingleEntry) => {
            Some(AnswerPayload::SingleEntry { text: text.clone() })
        }
        // Photos stay with the visit they were taken for.
        _ => None,
    }
}

/// Copy canonical answers into `visit`. Returns the prefilled question ids.
pub(crate) fn prefill_visit(
    conn: &Connection,
    doc: &LayoutDocument,
    visit: &PatientVisit,
    at: DateTime<Utc>,
) -> Result<Vec<i64>, CoreError> {
    let tags = prefill_tags(doc);
    if tags.is_empty() {
        return Ok(Vec::new());
    }

    let mut filled = Vec::new();
    for source in answers::store::answers_for_prefill(conn, visit.case_id, &tags)? {
        let Some(target) = doc.question_by_tag(&source.question_tag) else {
            continue;
        };
        let Some(payload) = remap_payload(&source.payload, target) else {
            tracing::debug!(
                question = %source.question_tag,
                "previous answer does not fit the new layout"
            );
            continue;
        };

        let id = insert_prefilled(conn, visit, at, &source, target, payload, None)?;
        copy_sub_answers(conn, visit, at, &source, target, id)?;
        filled.push(target.question_id);
    }

    if !filled.is_empty() {
        tracing::info!(visit = %visit.id, count = filled.len(), "answers prefilled");
    }
    Ok(filled)
}

/// Potential-answer id on `target` for the selection `source` made under `selection_id`.
fn remap_selection_id(source: &AnswerPayload, selection_id: i64, target: &Question) -> Option<i64> {
    let selection = source
        .selections()
        .into_iter()
        .find(|s| s.potential_answer_id == selection_id)?;
    target
        .potential_answer_by_tag(&selection.answer_tag)
        .map(|pa| pa.answer_id)
}

/// Sub-answers follow their parent selection through the answer-tag remap.
fn copy_sub_answers(
    conn: &Connection,
    visit: &PatientVisit,
    at: DateTime<Utc>,
    source: &AnswerRecord,
    target: &Question,
    parent_id: Uuid,
) -> Result<(), CoreError> {
    for child in db::child_answers(conn, source.id)? {
        let Some(selection_id) = child
            .parent_selection_id
            .and_then(|id| remap_selection_id(&source.payload, id, target))
        else {
            continue;
        };
        let Some(sub_question) = target
            .sub_questions()
            .iter()
            .find(|q| q.question_tag == child.question_tag)
        else {
            continue;
        };
        let Some(payload) = remap_payload(&child.payload, sub_question) else {
            continue;
        };

        let id = insert_prefilled(
            conn,
            visit,
            at,
            &child,
            sub_question,
            payload,
            Some((parent_id, selection_id)),
        )?;
        copy_sub_answers(conn, visit, at, &child, sub_question, id)?;
    }
    Ok(())
}

fn insert_prefilled(
    conn: &Connection,
    visit: &PatientVisit,
    at: DateTime<Utc>,
    source: &AnswerRecord,
    target: &Question,
    payload: AnswerPayload,
    parent: Option<(Uuid, i64)>,
) -> Result<Uuid, CoreError> {
    let id = Uuid::new_v4();
    db::insert_answer(
        conn,
        &AnswerRecord {
            id,
            context: AnswerContext::Visit,
            context_id: visit.id,
            question_id: target.question_id,
            question_tag: target.question_tag.clone(),
            actor_role: Role::Patient,
            actor_account_id: source.actor_account_id,
            session_id: String::new(),
            session_counter: 0,
            layout_version_id: visit.intake_layout_id,
            parent_answer_id: parent.map(|(pid, _)| pid),
            parent_selection_id: parent.map(|(_, sel)| sel),
            payload,
            status: RecordStatus::Active,
            prefilled: true,
            created_at: at,
        },
    )?;
    Ok(id)
}
