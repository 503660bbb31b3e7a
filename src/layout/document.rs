//! Layout document model and schema validation.
//!
//! A layout is a tree: sections hold screens, screens hold questions, and a
//! question may carry sub-questions asked once per selected answer.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::compat::AppVersion;
use crate::error::CoreError;
use crate::models::enums::QuestionType;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9_]+$").unwrap());

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutDocument {
    pub pathway_tag: String,
    pub sku_type: String,
    pub version: AppVersion,
    #[serde(default)]
    pub sections: Vec<LayoutSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutSection {
    pub section_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(default)]
    pub screens: Vec<Screen>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_title: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question_id: i64,
    pub question_tag: String,
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub potential_answers: Vec<PotentialAnswer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_questions_config: Option<SubQuestionsConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo_slots: Vec<PhotoSlotSpec>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub prefilled_with_previous_answers: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub to_alert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_formatted_text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialAnswer {
    pub answer_id: i64,
    pub answer_tag: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_summary: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub to_alert: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestionsConfig {
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoSlotSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
}

impl Question {
    pub fn potential_answer(&self, answer_id: i64) -> Option<&PotentialAnswer> {
        self.potential_answers.iter().find(|a| a.answer_id == answer_id)
    }

    pub fn potential_answer_by_tag(&self, tag: &str) -> Option<&PotentialAnswer> {
        self.potential_answers.iter().find(|a| a.answer_tag == tag)
    }

    pub fn sub_questions(&self) -> &[Question] {
        self.sub_questions_config
            .as_ref()
            .map(|c| c.questions.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_choice(&self) -> bool {
        matches!(
            self.question_type,
            QuestionType::SingleSelect
                | QuestionType::SegmentedControl
                | QuestionType::MultipleChoice
                | QuestionType::Autocomplete
        )
    }

    /// Text shown in place of an empty answer during review.
    pub fn empty_state_text(&self) -> Option<&str> {
        self.additional_fields
            .get("empty_state_text")
            .and_then(|v| v.as_str())
    }
}

impl LayoutDocument {
    /// Parse and validate a JSON document.
    pub fn parse(json: &str) -> Result<Self, CoreError> {
        let doc: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::invalid(format!("layout document: {e}")))?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(CoreError::internal)
    }

    /// Top-level questions in display order.
    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.sections
            .iter()
            .flat_map(|s| s.screens.iter())
            .flat_map(|screen| screen.questions.iter())
    }

    /// Every question including nested sub-questions.
    pub fn all_questions(&self) -> Vec<&Question> {
        fn walk<'a>(q: &'a Question, out: &mut Vec<&'a Question>) {
            out.push(q);
            for sub in q.sub_questions() {
                walk(sub, out);
            }
        }
        let mut out = Vec::new();
        for q in self.questions() {
            walk(q, &mut out);
        }
        out
    }

    pub fn question(&self, question_id: i64) -> Option<&Question> {
        self.all_questions()
            .into_iter()
            .find(|q| q.question_id == question_id)
    }

    pub fn question_by_tag(&self, tag: &str) -> Option<&Question> {
        self.all_questions().into_iter().find(|q| q.question_tag == tag)
    }

    pub fn is_top_level(&self, question_id: i64) -> bool {
        self.questions().any(|q| q.question_id == question_id)
    }

    /// Schema checks applied to every upload.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.pathway_tag.trim().is_empty() {
            return Err(CoreError::missing("pathway_tag"));
        }
        if self.sku_type.trim().is_empty() {
            return Err(CoreError::missing("sku_type"));
        }
        let all = self.all_questions();
        if all.is_empty() {
            return Err(CoreError::invalid("layout has no questions"));
        }

        let mut ids = HashSet::new();
        let mut tags = HashSet::new();
        for q in all {
            if !ids.insert(q.question_id) {
                return Err(CoreError::invalid(format!(
                    "duplicate question id {}",
                    q.question_id
                )));
            }
            if !TAG_PATTERN.is_match(&q.question_tag) {
                return Err(CoreError::invalid(format!(
                    "malformed question tag '{}'",
                    q.question_tag
                )));
            }
            if !tags.insert(q.question_tag.as_str()) {
                return Err(CoreError::invalid(format!(
                    "duplicate question tag '{}'",
                    q.question_tag
                )));
            }
            validate_question(q)?;
        }
        Ok(())
    }
}

fn validate_question(q: &Question) -> Result<(), CoreError> {
    let needs_answers = q.is_choice() && q.question_type != QuestionType::Autocomplete;
    if needs_answers && q.potential_answers.is_empty() {
        return Err(CoreError::invalid(format!(
            "question '{}' needs potential answers",
            q.question_tag
        )));
    }

    let mut answer_ids = HashSet::new();
    for a in &q.potential_answers {
        if a.answer_tag.trim().is_empty() {
            return Err(CoreError::missing("answer_tag"));
        }
        // Id 0 marks free autocomplete entries in stored answers.
        if a.answer_id <= 0 {
            return Err(CoreError::out_of_range(format!(
                "answer id {} in '{}' must be positive",
                a.answer_id, q.question_tag
            )));
        }
        if !answer_ids.insert(a.answer_id) {
            return Err(CoreError::invalid(format!(
                "duplicate answer id {} in '{}'",
                a.answer_id, q.question_tag
            )));
        }
    }

    if q.question_type == QuestionType::PhotoSection {
        if q.photo_slots.is_empty() {
            return Err(CoreError::invalid(format!(
                "photo question '{}' declares no slots",
                q.question_tag
            )));
        }
        let mut names = HashSet::new();
        if !q.photo_slots.iter().all(|s| names.insert(s.name.as_str())) {
            return Err(CoreError::invalid(format!(
                "duplicate slot name in '{}'",
                q.question_tag
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn choice(id: i64, tag: &str, answers: &[(i64, &str, &str)]) -> Question {
        Question {
            question_id: id,
            question_tag: tag.into(),
            question_type: QuestionType::SingleSelect,
            question_title: None,
            potential_answers: answers
                .iter()
                .map(|(answer_id, answer_tag, text)| PotentialAnswer {
                    answer_id: *answer_id,
                    answer_tag: answer_tag.to_string(),
                    answer: text.to_string(),
                    answer_summary: None,
                    to_alert: false,
                })
                .collect(),
            sub_questions_config: None,
            photo_slots: Vec::new(),
            prefilled_with_previous_answers: false,
            required: false,
            to_alert: false,
            alert_formatted_text: None,
            additional_fields: BTreeMap::new(),
        }
    }

    pub(crate) fn document(questions: Vec<Question>) -> LayoutDocument {
        LayoutDocument {
            pathway_tag: "health_condition_acne".into(),
            sku_type: "acne_visit".into(),
            version: AppVersion::new(1, 0, 0),
            sections: vec![LayoutSection {
                section_tag: "history".into(),
                section_title: Some("History".into()),
                screens: vec![Screen {
                    screen_type: None,
                    screen_title: None,
                    questions,
                }],
            }],
        }
    }

    #[test]
    fn parses_wire_format() {
        let json = r#"{
            "pathway_tag": "health_condition_acne",
            "sku_type": "acne_visit",
            "version": "1.2.0",
            "sections": [{
                "section_tag": "history",
                "screens": [{
                    "questions": [{
                        "question_id": 10,
                        "question_tag": "q_acne_length",
                        "question_type": "q_type_single_select",
                        "required": true,
                        "potential_answers": [
                            {"answer_id": 100, "answer_tag": "a_acne_0_6_months", "answer": "0-6 months"}
                        ]
                    }, {
                        "question_id": 11,
                        "question_tag": "q_face_photos",
                        "question_type": "q_type_photo_section",
                        "photo_slots": [{"name": "front", "required": true}, {"name": "left"}],
                        "additional_fields": {"empty_state_text": "No photos"}
                    }]
                }]
            }]
        }"#;
        let doc = LayoutDocument::parse(json).unwrap();
        assert_eq!(doc.version, AppVersion::new(1, 2, 0));
        assert_eq!(doc.questions().count(), 2);
        let q = doc.question_by_tag("q_acne_length").unwrap();
        assert!(q.required);
        assert_eq!(q.potential_answer(100).unwrap().answer_tag, "a_acne_0_6_months");
        let photo = doc.question(11).unwrap();
        assert_eq!(photo.empty_state_text(), Some("No photos"));
        assert!(photo.photo_slots[0].required);
        assert!(!photo.photo_slots[1].required);
    }

    #[test]
    fn serialization_roundtrip_is_identity() {
        let mut q = choice(1, "q_insurance_coverage", &[(10, "insured_yes", "Yes")]);
        q.prefilled_with_previous_answers = true;
        q.additional_fields
            .insert("empty_state_text".into(), serde_json::json!("None"));
        let doc = document(vec![q]);
        let back = LayoutDocument::parse(&doc.to_json().unwrap()).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn sub_questions_are_reachable() {
        let mut parent = choice(1, "q_current_medications", &[(10, "a_yes", "Yes")]);
        parent.sub_questions_config = Some(SubQuestionsConfig {
            questions: vec![Question {
                question_type: QuestionType::FreeText,
                potential_answers: Vec::new(),
                ..choice(2, "q_medication_length", &[])
            }],
        });
        let doc = document(vec![parent]);
        doc.validate().unwrap();
        assert!(doc.question(2).is_some());
        assert!(!doc.is_top_level(2));
        assert_eq!(doc.all_questions().len(), 2);
    }

    #[test]
    fn rejects_duplicate_question_ids() {
        let doc = document(vec![
            choice(1, "q_a", &[(1, "a", "A")]),
            choice(1, "q_b", &[(1, "b", "B")]),
        ]);
        assert!(doc.validate().unwrap_err().to_string().contains("duplicate question id"));
    }

    #[test]
    fn rejects_duplicate_tags_and_bad_tags() {
        let doc = document(vec![
            choice(1, "q_a", &[(1, "a", "A")]),
            choice(2, "q_a", &[(1, "a", "A")]),
        ]);
        assert!(doc.validate().is_err());
        let doc = document(vec![choice(1, "Q A", &[(1, "a", "A")])]);
        assert!(doc.validate().is_err());
    }

    #[test]
    fn choice_without_answers_is_invalid() {
        let doc = document(vec![choice(1, "q_a", &[])]);
        assert_eq!(doc.validate().unwrap_err().code(), "invalid_request");
    }

    #[test]
    fn photo_question_requires_slots() {
        let q = Question {
            question_type: QuestionType::PhotoSection,
            potential_answers: Vec::new(),
            ..choice(1, "q_photos", &[])
        };
        assert!(document(vec![q]).validate().is_err());
    }

    #[test]
    fn missing_sku_is_missing_field() {
        let mut doc = document(vec![choice(1, "q_a", &[(1, "a", "A")])]);
        doc.sku_type = " ".into();
        assert_eq!(doc.validate().unwrap_err().code(), "missing_field");
    }

    #[test]
    fn empty_layout_is_invalid() {
        assert!(document(Vec::new()).validate().is_err());
    }
}
