use crate::layout::Question;
use crate::models::{AnswerPayload, Selection};

/// One-line rendering of an answer for review screens and alert text.
///
/// Selections are comma-joined. Free text typed next to an "other" option
/// replaces that option's label.
pub fn render_answer(question: &Question, payload: &AnswerPayload) -> String {
    match payload {
        AnswerPayload::Scalar { selection } => label(question, selection),
        AnswerPayload::MultiSelect { selections } => selections
            .iter()
            .map(|s| label(question, s))
            .collect::<Vec<_>>()
            .join(", "),
        AnswerPayload::FreeText { text } | AnswerPayload::SingleEntry { text } => text.clone(),
        AnswerPayload::PhotoSection { sections } => {
            let count: usize = sections.iter().map(|s| s.slots.len()).sum();
            if count == 1 {
                "1 photo".to_string()
            } else {
                format!("{count} photos")
            }
        }
    }
}

/// Rendering for review, falling back to the question's empty-state text.
pub fn render_for_review(question: &Question, payload: Option<&AnswerPayload>) -> String {
    match payload {
        Some(p) => render_answer(question, p),
        None => question.empty_state_text().unwrap_or_default().to_string(),
    }
}

fn label(question: &Question, selection: &Selection) -> String {
    if let Some(text) = &selection.answer_text {
        return text.clone();
    }
    question
        .potential_answer(selection.potential_answer_id)
        .map(|pa| pa.answer_summary.as_deref().unwrap_or(&pa.answer).to_string())
        .unwrap_or_else(|| selection.answer_tag.clone())
}
