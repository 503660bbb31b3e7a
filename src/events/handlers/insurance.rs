//! Insurance-driven case tags and the insurance follow-up message.

use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use super::{schedule_message, MessageRequest};
use crate::answers::store::canonical_answers;
use crate::db;
use crate::events::{CoreEvent, EventHandler, HandlerEnv, HandlerError};
use crate::models::enums::{AnswerContext, MessageStatus, Role};

pub const INSURANCE_QUESTION_TAG: &str = "q_insurance_coverage";

const NO_INSURANCE_TAGS: [&str; 3] = [
    "q_insurance_coverage_i_dont_have_insurance",
    "a_no_insurance",
    "no_insurance",
];

const MEDICAID_TAGS: [&str; 2] = ["q_insurance_coverage_medicaid", "a_medicaid"];

/// Coverage as read from the insurance question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    Insured,
    Uninsured,
    Medicaid,
}

impl Coverage {
    /// `None` when nothing was selected.
    pub fn from_answer_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let tags: Vec<&str> = tags.into_iter().collect();
        if tags.is_empty() {
            None
        } else if tags.iter().any(|t| MEDICAID_TAGS.contains(t)) {
            Some(Self::Medicaid)
        } else if tags.iter().any(|t| NO_INSURANCE_TAGS.contains(t)) {
            Some(Self::Uninsured)
        } else {
            Some(Self::Insured)
        }
    }

    pub fn tags(self) -> &'static [&'static str] {
        match self {
            Self::Insured => &["insured"],
            Self::Uninsured => &["uninsured"],
            Self::Medicaid => &["medicaid", "insured"],
        }
    }

    /// Tags that contradict this coverage.
    pub fn opposite_tags(self) -> &'static [&'static str] {
        match self {
            Self::Insured | Self::Medicaid => &["uninsured"],
            Self::Uninsured => &["insured", "medicaid"],
        }
    }

    /// (message event type, template)
    fn message(self) -> (&'static str, &'static str) {
        match self {
            Self::Uninsured => ("uninsured_patient", "uninsured_info"),
            Self::Insured | Self::Medicaid => ("insured_patient", "insurance_info"),
        }
    }
}

fn coverage_for_visit(conn: &Connection, visit_id: Uuid) -> Result<Option<Coverage>, HandlerError> {
    let answers = canonical_answers(conn, AnswerContext::Visit, visit_id, Role::Patient)?;
    Ok(answers
        .iter()
        .find(|a| a.question_tag == INSURANCE_QUESTION_TAG)
        .and_then(|a| {
            Coverage::from_answer_tags(a.payload.selections().iter().map(|s| s.answer_tag.as_str()))
        }))
}

pub struct InsuranceTagging;

impl EventHandler for InsuranceTagging {
    fn name(&self) -> &str {
        "insurance_tags"
    }

    fn handle(&self, env: &HandlerEnv<'_>, event: &CoreEvent) -> Result<(), HandlerError> {
        let CoreEvent::VisitSubmitted { visit_id, case_id, .. } = event else {
            return Ok(());
        };
        let Some(coverage) = coverage_for_visit(env.conn, *visit_id)? else {
            return Ok(());
        };
        for tag in coverage.tags() {
            db::add_case_tag(env.conn, *case_id, tag, None, false, env.now)?;
        }
        for tag in coverage.opposite_tags() {
            if db::remove_case_tag(env.conn, *case_id, tag)? {
                tracing::debug!(case = %case_id, tag, "contradicting tag removed");
            }
        }
        tracing::info!(case = %case_id, ?coverage, "insurance tags applied");
        Ok(())
    }
}

/// Schedules the insurance information message for the first visit of a case.
/// Followups never get one, whatever their coverage.
pub struct InsuranceMessage;

impl EventHandler for InsuranceMessage {
    fn name(&self) -> &str {
        "insurance_message"
    }

    fn handle(&self, env: &HandlerEnv<'_>, event: &CoreEvent) -> Result<(), HandlerError> {
        let CoreEvent::VisitSubmitted { visit_id, case_id, patient_id, at } = event else {
            return Ok(());
        };
        let visit = db::get_visit(env.conn, *visit_id)?;
        let submitted_at = visit.submitted_at.unwrap_or(*at);
        if visit.is_followup
            || db::count_submitted_before(env.conn, *case_id, visit.id, submitted_at)? > 0
        {
            tracing::debug!(visit = %visit_id, "not the first visit of the case, no insurance message");
            return Ok(());
        }
        let Some(coverage) = coverage_for_visit(env.conn, *visit_id)? else {
            return Ok(());
        };

        let (event_type, template_id) = coverage.message();
        let live = [MessageStatus::Scheduled, MessageStatus::Sent];
        if db::count_messages(env.conn, *case_id, event_type, &live)? > 0 {
            return Ok(());
        }

        let patient = db::get_patient(env.conn, *patient_id)?;
        schedule_message(
            env.conn,
            MessageRequest {
                event_type,
                template_id,
                case_id: *case_id,
                person_id: patient.id,
                scheduled_at: *at + env.config.insurance_message_delay,
                data: json!({ "first_name": patient.first_name }),
            },
            env.now,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{q, Fixture};

    #[test]
    fn coverage_from_tags() {
        assert_eq!(Coverage::from_answer_tags(["insured_yes"]), Some(Coverage::Insured));
        assert_eq!(Coverage::from_answer_tags(["no_insurance"]), Some(Coverage::Uninsured));
        assert_eq!(
            Coverage::from_answer_tags(["q_insurance_coverage_i_dont_have_insurance"]),
            Some(Coverage::Uninsured)
        );
        assert_eq!(Coverage::from_answer_tags(["a_medicaid"]), Some(Coverage::Medicaid));
        assert_eq!(Coverage::from_answer_tags(Vec::<&str>::new()), None);
    }

    #[test]
    fn medicaid_is_also_insured() {
        assert_eq!(Coverage::Medicaid.tags(), &["medicaid", "insured"]);
        assert!(Coverage::Medicaid.opposite_tags().contains(&"uninsured"));
    }

    fn tag_names(fx: &Fixture) -> Vec<String> {
        fx.core
            .case_tags(&fx.cc_ctx(), fx.case_id)
            .unwrap()
            .into_iter()
            .map(|t| t.tag)
            .collect()
    }

    #[test]
    fn followup_flips_tags_without_second_message() {
        let fx = Fixture::with_open_visit();
        let ctx = fx.patient_ctx();
        fx.answer_required(&ctx);
        fx.core.submit_visit(&ctx, fx.visit_id).unwrap();
        fx.core.dispatch_pending().unwrap();
        assert_eq!(tag_names(&fx), vec!["insured".to_string()]);

        // A later visit reports no insurance.
        let followup = fx.treat_and_follow_up();
        fx.answer_required_on(&ctx, followup, "f1");
        fx.answer_insurance_on(&ctx, followup, q::NO_INSURANCE, "f1", 2);
        fx.core.submit_visit(&ctx, followup).unwrap();
        fx.core.dispatch_pending().unwrap();
        assert_eq!(tag_names(&fx), vec!["uninsured".to_string()]);

        let messages = fx.core.case_messages(&fx.cc_ctx(), fx.case_id).unwrap();
        let insurance: Vec<_> = messages
            .iter()
            .filter(|m| m.event_type == "insured_patient" || m.event_type == "uninsured_patient")
            .collect();
        assert_eq!(insurance.len(), 1);
        assert_eq!(insurance[0].template_id, "insurance_info");
        assert_eq!(insurance[0].status, MessageStatus::Scheduled);
    }

    #[test]
    fn tagging_is_idempotent() {
        let fx = Fixture::with_submitted_visit();
        fx.core.dispatch_pending().unwrap();
        let before = tag_names(&fx);
        // Replaying the delivery must not duplicate anything.
        fx.core
            .store()
            .write(&crate::context::CancelHandle::new(), |tx| {
                let env = HandlerEnv {
                    conn: tx,
                    config: fx.core.config(),
                    layouts: fx.core.layouts(),
                    now: chrono::Utc::now(),
                };
                let event = CoreEvent::VisitSubmitted {
                    visit_id: fx.visit_id,
                    case_id: fx.case_id,
                    patient_id: fx.patient_id,
                    at: chrono::Utc::now(),
                };
                InsuranceTagging.handle(&env, &event).unwrap();
                InsuranceMessage.handle(&env, &event).unwrap();
                Ok(())
            })
            .unwrap();
        assert_eq!(tag_names(&fx), before);
        let messages = fx.core.case_messages(&fx.cc_ctx(), fx.case_id).unwrap();
        assert_eq!(messages.len(), 1);
    }
}
