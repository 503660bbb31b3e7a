//! Wire answers to typed payloads, driven by the question's type.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::layout::Question;
use crate::models::enums::QuestionType;
use crate::models::{AnswerPayload, PhotoSection, Selection};

/// One question's answer as a client sends it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerInput {
    pub question_id: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub potential_answers: Vec<AnswerItemInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo_sections: Vec<PhotoSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerItemInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potential_answer_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_answers: Vec<AnswerInput>,
}

impl AnswerInput {
    pub fn select(question_id: i64, potential_answer_id: i64) -> Self {
        Self {
            question_id,
            potential_answers: vec![AnswerItemInput {
                potential_answer_id: Some(potential_answer_id),
                ..Default::default()
            }],
            photo_sections: Vec::new(),
        }
    }

    pub fn text(question_id: i64, text: &str) -> Self {
        Self {
            question_id,
            potential_answers: vec![AnswerItemInput {
                answer_text: Some(text.to_string()),
                ..Default::default()
            }],
            photo_sections: Vec::new(),
        }
    }

    pub fn photos(question_id: i64, sections: Vec<PhotoSection>) -> Self {
        Self {
            question_id,
            potential_answers: Vec::new(),
            photo_sections: sections,
        }
    }
}

/// A validated answer and its sub-answers, keyed by the selection they hang off.
#[derive(Debug)]
pub struct ConvertedAnswer<'q> {
    pub question: &'q Question,
    pub payload: AnswerPayload,
    pub children: Vec<(i64, ConvertedAnswer<'q>)>,
}

pub fn convert<'q>(question: &'q Question, input: &AnswerInput) -> Result<ConvertedAnswer<'q>, CoreError> {
    let is_photo = question.question_type == QuestionType::PhotoSection;
    if is_photo && !input.potential_answers.is_empty() {
        return Err(CoreError::invalid(format!(
            "photo question {} takes photo_sections only",
            question.question_id
        )));
    }
    if !is_photo && !input.photo_sections.is_empty() {
        return Err(CoreError::invalid(format!(
            "question {} does not take photos",
            question.question_id
        )));
    }

    let payload = match question.question_type {
        QuestionType::SingleSelect | QuestionType::SegmentedControl => {
            let item = single_item(question, input)?;
            AnswerPayload::Scalar { selection: offered(question, item)? }
        }
        QuestionType::MultipleChoice => AnswerPayload::MultiSelect {
            selections: selections(question, input, offered)?,
        },
        QuestionType::Autocomplete => AnswerPayload::MultiSelect {
            selections: selections(question, input, |q, item| match item.potential_answer_id {
                Some(_) => offered(q, item),
                None => Ok(Selection {
                    potential_answer_id: 0,
                    answer_tag: String::new(),
                    answer_text: Some(required_text(item)?),
                }),
            })?,
        },
        QuestionType::FreeText => AnswerPayload::FreeText {
            text: required_text(single_item(question, input)?)?,
        },
        QuestionType::SingleEntry => AnswerPayload::SingleEntry {
            text: required_text(single_item(question, input)?)?,
        },
        QuestionType::PhotoSection => AnswerPayload::PhotoSection {
            sections: photo_sections(question, &input.photo_sections)?,
        },
    };

    Ok(ConvertedAnswer {
        question,
        payload,
        children: sub_answers(question, input)?,
    })
}

fn single_item<'a>(question: &Question, input: &'a AnswerInput) -> Result<&'a AnswerItemInput, CoreError> {
    match input.potential_answers.as_slice() {
        [item] => Ok(item),
        [] => Err(CoreError::missing("potential_answers")),
        _ => Err(CoreError::invalid(format!(
            "question {} takes a single answer",
            question.question_id
        ))),
    }
}

fn selections<F>(question: &Question, input: &AnswerInput, pick: F) -> Result<Vec<Selection>, CoreError>
where
    F: Fn(&Question, &AnswerItemInput) -> Result<Selection, CoreError>,
{
    if input.potential_answers.is_empty() {
        return Err(CoreError::missing("potential_answers"));
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(input.potential_answers.len());
    for item in &input.potential_answers {
        let selection = pick(question, item)?;
        if selection.potential_answer_id != 0 && !seen.insert(selection.potential_answer_id) {
            return Err(CoreError::invalid(format!(
                "answer {} selected twice",
                selection.potential_answer_id
            )));
        }
        out.push(selection);
    }
    Ok(out)
}

/// Selection of one of the question's potential answers.
fn offered(question: &Question, item: &AnswerItemInput) -> Result<Selection, CoreError> {
    let id = item
        .potential_answer_id
        .ok_or_else(|| CoreError::missing("potential_answer_id"))?;
    let pa = question.potential_answer(id).ok_or_else(|| {
        CoreError::invalid(format!(
            "answer {id} is not offered by '{}'",
            question.question_tag
        ))
    })?;
    Ok(Selection {
        potential_answer_id: pa.answer_id,
        answer_tag: pa.answer_tag.clone(),
        answer_text: item
            .answer_text
            .as_ref()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
    })
}

fn required_text(item: &AnswerItemInput) -> Result<String, CoreError> {
    item.answer_text
        .as_ref()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CoreError::missing("answer_text"))
}

fn photo_sections(question: &Question, sections: &[PhotoSection]) -> Result<Vec<PhotoSection>, CoreError> {
    if sections.is_empty() {
        return Err(CoreError::missing("photo_sections"));
    }

    let mut filled = HashSet::new();
    let mut blobs = HashSet::new();
    for section in sections {
        let mut in_section = HashSet::new();
        for slot in &section.slots {
            if !question.photo_slots.iter().any(|s| s.name == slot.slot_name) {
                return Err(CoreError::invalid(format!(
                    "'{}' has no photo slot '{}'",
                    question.question_tag, slot.slot_name
                )));
            }
            if slot.blob_id.trim().is_empty() {
                return Err(CoreError::missing("blob_id"));
            }
            if !in_section.insert(slot.slot_name.as_str()) {
                return Err(CoreError::invalid(format!(
                    "slot '{}' filled twice in section '{}'",
                    slot.slot_name, section.name
                )));
            }
            if !blobs.insert(slot.blob_id.as_str()) {
                return Err(CoreError::invalid(format!(
                    "photo {} used twice",
                    slot.blob_id
                )));
            }
            filled.insert(slot.slot_name.as_str());
        }
    }

    if let Some(empty) = question
        .photo_slots
        .iter()
        .find(|s| s.required && !filled.contains(s.name.as_str()))
    {
        return Err(CoreError::invalid(format!(
            "required photo slot '{}' is empty",
            empty.name
        )));
    }
    Ok(sections.to_vec())
}

fn sub_answers<'q>(
    question: &'q Question,
    input: &AnswerInput,
) -> Result<Vec<(i64, ConvertedAnswer<'q>)>, CoreError> {
    let mut out = Vec::new();
    for item in input.potential_answers.iter().filter(|i| !i.sub_answers.is_empty()) {
        let selection_id = match (question.is_choice(), item.potential_answer_id) {
            (true, Some(id)) => id,
            _ => {
                return Err(CoreError::invalid(format!(
                    "sub-answers of '{}' must hang off a selected answer",
                    question.question_tag
                )))
            }
        };

        let mut seen = HashSet::new();
        for sub in &item.sub_answers {
            let sub_question = question
                .sub_questions()
                .iter()
                .find(|q| q.question_id == sub.question_id)
                .ok_or_else(|| {
                    CoreError::invalid(format!(
                        "question {} is not a sub-question of '{}'",
                        sub.question_id, question.question_tag
                    ))
                })?;
            if !seen.insert(sub.question_id) {
                return Err(CoreError::invalid(format!(
                    "sub-question {} answered twice",
                    sub.question_id
                )));
            }
            out.push((selection_id, convert(sub_question, sub)?));
        }
    }
    Ok(out)
}
