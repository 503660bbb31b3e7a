use uuid::Uuid;

use crate::answers::render_answer;
use crate::answers::store::canonical_answers;
use crate::db;
use crate::events::{CoreEvent, EventHandler, HandlerEnv, HandlerError};
use crate::layout::Question;
use crate::models::enums::{AnswerContext, Role};
use crate::models::{Alert, AnswerRecord};

/// Placeholder in `alert_formatted_text` replaced by the rendered answer.
const ANSWER_PLACEHOLDER: &str = "XXX";

fn alert_text(question: &Question, answer: &AnswerRecord) -> Option<String> {
    let flagged = question.to_alert
        || answer
            .payload
            .selections()
            .iter()
            .filter_map(|s| question.potential_answer(s.potential_answer_id))
            .any(|pa| pa.to_alert);
    if !flagged {
        return None;
    }
    let rendered = render_answer(question, &answer.payload);
    Some(match &question.alert_formatted_text {
        Some(template) => template.replace(ANSWER_PLACEHOLDER, &rendered),
        None => format!(
            "{}: {rendered}",
            question.question_title.as_deref().unwrap_or(&question.question_tag)
        ),
    })
}

/// Clinician alerts raised from the submitted intake and the patient's age.
pub struct VisitAlerts;

impl EventHandler for VisitAlerts {
    fn name(&self) -> &str {
        "visit_alerts"
    }

    fn handle(&self, env: &HandlerEnv<'_>, event: &CoreEvent) -> Result<(), HandlerError> {
        let CoreEvent::VisitSubmitted { visit_id, case_id, patient_id, at } = event else {
            return Ok(());
        };
        let visit = db::get_visit(env.conn, *visit_id)?;
        let doc = env.layouts.document(env.conn, visit.intake_layout_id)?;

        let mut raised = 0;
        let mut raise = |question_id: Option<i64>, message: String, dismissable: bool| {
            let alert = Alert {
                id: Uuid::new_v4(),
                case_id: *case_id,
                visit_id: Some(*visit_id),
                question_id,
                message,
                dismissable,
                created_at: env.now,
                dismissed_at: None,
            };
            if db::insert_alert(env.conn, &alert)? {
                raised += 1;
            }
            Ok::<_, HandlerError>(())
        };

        for answer in canonical_answers(env.conn, AnswerContext::Visit, visit.id, Role::Patient)? {
            let Some(question) = doc.question(answer.question_id) else {
                continue;
            };
            if let Some(text) = alert_text(question, &answer) {
                raise(Some(question.question_id), text, true)?;
            }
        }

        let patient = db::get_patient(env.conn, *patient_id)?;
        if patient.age_on(at.date_naive()) < env.config.minor_age {
            raise(None, format!("Patient is under {}", env.config.minor_age), false)?;
        }

        if raised > 0 {
            tracing::info!(visit = %visit_id, raised, "visit alerts raised");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answers::AnswerInput;
    use crate::layout::document::tests::choice;
    use crate::models::enums::RecordStatus;
    use crate::models::{AnswerPayload, Selection};
    use crate::test_support::{q, Fixture};
    use chrono::Utc;

    fn record(payload: AnswerPayload) -> AnswerRecord {
        AnswerRecord {
            id: Uuid::new_v4(),
            context: AnswerContext::Visit,
            context_id: Uuid::new_v4(),
            question_id: 1,
            question_tag: "q_topical".into(),
            actor_role: Role::Patient,
            actor_account_id: Uuid::new_v4(),
            session_id: String::new(),
            session_counter: 1,
            layout_version_id: Uuid::new_v4(),
            parent_answer_id: None,
            parent_selection_id: None,
            payload,
            status: RecordStatus::Active,
            prefilled: false,
            created_at: Utc::now(),
        }
    }

    fn selected(id: i64, tag: &str) -> AnswerPayload {
        AnswerPayload::Scalar {
            selection: Selection {
                potential_answer_id: id,
                answer_tag: tag.into(),
                answer_text: None,
            },
        }
    }

    #[test]
    fn placeholder_is_replaced_with_answer() {
        let mut question = choice(1, "q_topical", &[(10, "a_yes", "Yes"), (11, "a_no", "No")]);
        question.to_alert = true;
        question.alert_formatted_text = Some("Currently uses topicals: XXX".into());
        let text = alert_text(&question, &record(selected(10, "a_yes"))).unwrap();
        assert_eq!(text, "Currently uses topicals: Yes");
    }

    #[test]
    fn alerting_answer_flags_unflagged_question() {
        let mut question = choice(1, "q_topical", &[(10, "a_yes", "Yes"), (11, "a_no", "No")]);
        question.potential_answers[0].to_alert = true;
        assert!(alert_text(&question, &record(selected(11, "a_no"))).is_none());
        assert!(alert_text(&question, &record(selected(10, "a_yes"))).is_some());
    }

    #[test]
    fn minor_gets_exactly_one_age_alert() {
        let fx = Fixture::with_patient_age(15).opened();
        let ctx = fx.patient_ctx();
        fx.answer_required(&ctx);
        fx.core.submit_visit(&ctx, fx.visit_id).unwrap();
        fx.core.dispatch_pending().unwrap();
        fx.core.dispatch_pending().unwrap();

        let alerts = fx.core.visit_alerts(&fx.cc_ctx(), fx.visit_id).unwrap();
        let age: Vec<_> = alerts.iter().filter(|a| a.message == "Patient is under 18").collect();
        assert_eq!(age.len(), 1);
        assert!(!age[0].dismissable);
    }

    #[test]
    fn flagged_intake_answer_raises_alert() {
        let fx = Fixture::with_open_visit();
        let ctx = fx.patient_ctx();
        fx.answer_required(&ctx);
        fx.core
            .put_answers(&ctx, fx.visit_id, "s9", 1, &[AnswerInput::select(q::TOPICAL, q::TOPICAL_YES)])
            .unwrap();
        fx.core.submit_visit(&ctx, fx.visit_id).unwrap();
        fx.core.dispatch_pending().unwrap();

        let alerts = fx.core.visit_alerts(&fx.cc_ctx(), fx.visit_id).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "Uses topical treatments: Yes");
        assert_eq!(alerts[0].question_id, Some(q::TOPICAL));
    }
}
