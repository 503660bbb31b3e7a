//! End-to-end flows across the whole workflow, plus property checks.

use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use uuid::Uuid;

use crate::answers::AnswerInput;
use crate::diagnosis::DiagnosisSetInput;
use crate::error::{CoreError, StateConflict};
use crate::events::{CoreEvent, EventHandler, HandlerEnv, HandlerError};
use crate::models::enums::{
    CaseStatus, MessageStatus, ProviderRole, Role, TreatmentPlanStatus, VisitStatus,
};
use crate::models::AnswerPayload;
use crate::test_support::{admin_ctx, q, Fixture};

fn case_tags(fx: &Fixture) -> Vec<String> {
    fx.core
        .case_tags(&fx.cc_ctx(), fx.case_id)
        .unwrap()
        .into_iter()
        .map(|t| t.tag)
        .collect()
}

fn scheduled_templates(fx: &Fixture) -> Vec<String> {
    fx.core
        .case_messages(&fx.cc_ctx(), fx.case_id)
        .unwrap()
        .into_iter()
        .filter(|m| m.status == MessageStatus::Scheduled)
        .map(|m| m.template_id)
        .collect()
}

/// Open, answer insurance with `answer_id`, add the face photo, submit.
fn submit_with_insurance(answer_id: i64) -> Fixture {
    let fx = Fixture::new().opened();
    let patient = fx.patient_ctx();
    fx.answer_required(&patient);
    fx.answer_insurance_on(&patient, fx.visit_id, answer_id, "s0", 2);

    assert_eq!(fx.core.case(&patient, fx.case_id).unwrap().status, CaseStatus::Open);
    fx.core.submit_visit(&patient, fx.visit_id).unwrap();
    fx.core.dispatch_pending().unwrap();
    fx
}

#[test]
fn happy_path_visit_is_tagged_insured() {
    let fx = submit_with_insurance(q::INSURED_YES);

    let case = fx.core.case(&fx.patient_ctx(), fx.case_id).unwrap();
    assert_eq!(case.status, CaseStatus::Active);
    let tags = case_tags(&fx);
    assert!(tags.contains(&"insured".to_string()));
    assert!(!tags.contains(&"uninsured".to_string()));
    assert_eq!(scheduled_templates(&fx), vec!["insurance_info".to_string()]);
}

#[test]
fn uninsured_visit_gets_uninsured_message() {
    let fx = submit_with_insurance(q::NO_INSURANCE);

    let tags = case_tags(&fx);
    assert!(tags.contains(&"uninsured".to_string()));
    assert!(!tags.contains(&"insured".to_string()));
    assert_eq!(scheduled_templates(&fx), vec!["uninsured_info".to_string()]);
}

#[test]
fn followup_submission_schedules_no_second_insurance_message() {
    let fx = submit_with_insurance(q::INSURED_YES);
    let patient = fx.patient_ctx();
    let followup = fx.treat_and_follow_up();
    fx.answer_required_on(&patient, followup, "followup");
    fx.answer_insurance_on(&patient, followup, q::NO_INSURANCE, "followup", 2);
    fx.core.submit_visit(&patient, followup).unwrap();
    fx.core.dispatch_pending().unwrap();

    let insurance: Vec<_> = fx
        .core
        .case_messages(&fx.cc_ctx(), fx.case_id)
        .unwrap()
        .into_iter()
        .filter(|m| m.template_id == "insurance_info" || m.template_id == "uninsured_info")
        .map(|m| (m.template_id, m.status))
        .collect();
    assert_eq!(insurance, vec![("insurance_info".to_string(), MessageStatus::Scheduled)]);
}

#[test]
fn minor_patient_raises_one_age_alert() {
    let fx = Fixture::with_patient_age(15).submitted();
    fx.core.dispatch_pending().unwrap();

    let alerts = fx.core.visit_alerts(&admin_ctx(), fx.visit_id).unwrap();
    let age: Vec<_> = alerts
        .iter()
        .filter(|a| a.message == "Patient is under 18")
        .collect();
    assert_eq!(age.len(), 1);
}

#[test]
fn followup_is_prefilled_from_treated_visit() {
    let fx = Fixture::new().opened();
    let patient = fx.patient_ctx();
    fx.answer_required(&patient);
    fx.core
        .put_answers(
            &patient,
            fx.visit_id,
            "s0",
            2,
            &[AnswerInput::text(q::ALLERGIES, "Sulfa Drugs")],
        )
        .unwrap();
    fx.core.submit_visit(&patient, fx.visit_id).unwrap();
    let followup = fx.treat_and_follow_up();

    let intake = fx.core.visit_intake(&patient, followup).unwrap();
    assert!(intake.visit.is_followup);
    let allergies = intake
        .answers
        .iter()
        .find(|a| a.question_tag == "q_allergic_medication_entry")
        .expect("allergies prefilled");
    assert!(allergies.prefilled);
    assert_eq!(
        allergies.payload,
        AnswerPayload::SingleEntry { text: "Sulfa Drugs".into() }
    );
}

#[test]
fn followup_prefill_carries_sub_answers() {
    let fx = Fixture::new().opened();
    let patient = fx.patient_ctx();
    fx.answer_required(&patient);
    let mut topical = AnswerInput::select(q::TOPICAL, q::TOPICAL_YES);
    topical.potential_answers[0].sub_answers = vec![AnswerInput::text(q::TOPICAL_NAME, "Retin-A")];
    fx.core.put_answers(&patient, fx.visit_id, "s0", 2, &[topical]).unwrap();
    fx.core.submit_visit(&patient, fx.visit_id).unwrap();
    let followup = fx.treat_and_follow_up();

    let intake = fx.core.visit_intake(&patient, followup).unwrap();
    let topical = intake
        .answers
        .iter()
        .find(|a| a.question_tag == "q_topical_treatments")
        .expect("topical prefilled");
    assert!(topical.prefilled);
    assert_eq!(topical.payload.selections()[0].potential_answer_id, q::FOLLOWUP_TOPICAL_YES);

    assert_eq!(topical.sub_answers.len(), 1);
    let name = &topical.sub_answers[0];
    assert!(name.prefilled);
    assert_eq!(name.parent_selection_id, Some(q::FOLLOWUP_TOPICAL_YES));
    assert_eq!(name.payload, AnswerPayload::SingleEntry { text: "Retin-A".into() });
}

#[derive(Default)]
struct UnsuitableWatcher {
    reasons: Mutex<Vec<String>>,
}

impl EventHandler for UnsuitableWatcher {
    fn name(&self) -> &str {
        "unsuitable_watcher"
    }

    fn handle(&self, _env: &HandlerEnv<'_>, event: &CoreEvent) -> Result<(), HandlerError> {
        if let CoreEvent::VisitMarkedUnsuitable { reason, .. } = event {
            self.reasons.lock().unwrap().push(reason.clone());
        }
        Ok(())
    }
}

#[test]
fn unsuitable_diagnosis_triages_and_blocks_plans() {
    let watcher = Arc::new(UnsuitableWatcher::default());
    let fx = Fixture::with_subscriber(watcher.clone()).reviewing();
    let doctor = fx.doctor_ctx();

    fx.core
        .attach_diagnosis_set(&doctor, fx.visit_id, DiagnosisSetInput::unsuitable("Not treatable"))
        .unwrap();
    assert_eq!(fx.core.visit(&doctor, fx.visit_id).unwrap().status, VisitStatus::Triaged);

    fx.core.dispatch_pending().unwrap();
    assert_eq!(*watcher.reasons.lock().unwrap(), vec!["Not treatable".to_string()]);

    let err = fx.core.create_draft(&doctor, fx.case_id, None, None).unwrap_err();
    assert!(err.is_state_conflict(), "{err}");
}

#[test]
fn unsuitable_diagnosis_retires_open_draft() {
    let fx = Fixture::with_reviewing_visit();
    let doctor = fx.doctor_ctx();
    let draft = fx.core.create_draft(&doctor, fx.case_id, None, None).unwrap();

    fx.core
        .attach_diagnosis_set(&doctor, fx.visit_id, DiagnosisSetInput::unsuitable("Not treatable"))
        .unwrap();

    let err = fx.core.create_draft(&doctor, fx.case_id, None, None).unwrap_err();
    assert!(err.is_state_conflict(), "{err}");
    let retired = fx.core.treatment_plan(&doctor, draft.id).unwrap();
    assert_eq!(retired.status, TreatmentPlanStatus::Inactive);
    let err = fx.core.submit_draft(&doctor, draft.id).unwrap_err();
    assert!(err.is_state_conflict(), "{err}");
}

#[test]
fn concurrent_claims_have_one_winner() {
    let fx = Fixture::with_routed_visit();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [fx.doctor_ctx(), fx.other_doctor_ctx()]
        .into_iter()
        .map(|ctx| {
            let core = Arc::clone(&fx.core);
            let barrier = Arc::clone(&barrier);
            let case_id = fx.case_id;
            thread::spawn(move || {
                barrier.wait();
                core.claim_case(&ctx, case_id)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let lost = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        lost,
        CoreError::StateConflict(StateConflict::AlreadyClaimed)
    ));

    let team = fx.core.care_team(&admin_ctx(), fx.case_id).unwrap();
    let doctors = team
        .members
        .iter()
        .filter(|m| m.role == ProviderRole::Doctor)
        .count();
    assert_eq!(doctors, 1);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    use crate::compat::{AppVersion, VersionRange};
    use crate::core_state::CoreState;
    use crate::layout::document::tests::{choice, document};
    use crate::layout::{LayoutDocument, LayoutUpload};
    use crate::models::enums::{LayoutPurpose, LayoutRole, LayoutVariant, Platform};
    use crate::test_support::{patient_ctx, PATHWAY};

    const INSURANCE_ANSWERS: [i64; 3] = [q::INSURED_YES, q::NO_INSURANCE, q::MEDICAID];

    fn layout_strategy() -> impl Strategy<Value = LayoutDocument> {
        let question = (
            proptest::option::of("[A-Za-z ?]{1,24}"),
            proptest::collection::vec("[a-z]{1,8}", 1..4),
            any::<bool>(),
        );
        proptest::collection::vec(question, 1..6).prop_map(|questions| {
            let questions = questions
                .into_iter()
                .enumerate()
                .map(|(i, (title, answers, required))| {
                    let id = i as i64 + 1;
                    let answers: Vec<(i64, String, String)> = answers
                        .into_iter()
                        .enumerate()
                        .map(|(j, text)| (id * 100 + j as i64 + 1, format!("a_{j}_{text}"), text))
                        .collect();
                    let borrowed: Vec<(i64, &str, &str)> = answers
                        .iter()
                        .map(|(aid, tag, text)| (*aid, tag.as_str(), text.as_str()))
                        .collect();
                    let mut q = choice(id, &format!("q_generated_{id}"), &borrowed);
                    q.question_title = title;
                    q.required = required;
                    q
                })
                .collect();
            document(questions)
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Whatever order writes arrive in, reads return the highest accepted counter.
        #[test]
        fn highest_counter_wins(
            writes in proptest::collection::vec((1i64..40, 0usize..3), 1..12)
        ) {
            let fx = Fixture::with_open_visit();
            let patient = fx.patient_ctx();
            let mut max_counter = 0;
            let mut expected = None;

            for (counter, pick) in writes {
                let answer = AnswerInput::select(q::INSURANCE, INSURANCE_ANSWERS[pick]);
                let result = fx.core.put_answers(&patient, fx.visit_id, "prop", counter, &[answer]);
                if counter > max_counter {
                    prop_assert!(result.is_ok());
                    max_counter = counter;
                    expected = Some(INSURANCE_ANSWERS[pick]);
                } else {
                    let err = result.unwrap_err();
                    prop_assert_eq!(err.code(), "session_out_of_order");
                }
            }

            let views = fx
                .core
                .get_answers(&patient, fx.visit_id, &[q::INSURANCE], Role::Patient)
                .unwrap();
            prop_assert_eq!(views.len(), 1);
            prop_assert_eq!(views[0].session_counter, max_counter);
            let selected = views[0].payload.selections()[0].potential_answer_id;
            prop_assert_eq!(Some(selected), expected);
        }

        /// A stored layout parses back to what was uploaded and resolves to it.
        #[test]
        fn layout_round_trips_through_registry(doc in layout_strategy()) {
            let json = doc.to_json().unwrap();
            prop_assert_eq!(&LayoutDocument::parse(&json).unwrap(), &doc);

            let core = CoreState::in_memory().unwrap();
            core.provision_pathway(PATHWAY, "Acne").unwrap();
            let admin = admin_ctx();
            let upload = LayoutUpload {
                pathway_tag: PATHWAY.into(),
                purpose: LayoutPurpose::Intake,
                variant: LayoutVariant::Initial,
                role: LayoutRole::Patient,
                platform: Platform::Ios,
                app_range: VersionRange::from_min(AppVersion::new(1, 0, 0)),
                diagnosis_code: None,
                document_json: json,
            };
            let stored = core.upload_layout(&admin, upload).unwrap();
            core.activate_layout(&admin, stored.id).unwrap();

            let resolved = core
                .resolve_layout_for(
                    &patient_ctx(Uuid::new_v4()),
                    PATHWAY,
                    LayoutPurpose::Intake,
                    LayoutVariant::Initial,
                )
                .unwrap();
            prop_assert_eq!(resolved.id, stored.id);
            prop_assert_eq!(&*core.layout_document(resolved.id).unwrap(), &doc);
        }

        /// Repeating a tag never adds a second row.
        #[test]
        fn tagging_is_idempotent(tag in "[a-z_]{1,12}", repeats in 1usize..5) {
            let fx = Fixture::with_open_visit();
            let cc = fx.cc_ctx();
            for i in 0..repeats {
                let padded = if i % 2 == 0 { tag.clone() } else { format!(" {} ", tag.to_uppercase()) };
                let added = fx.core.tag_case(&cc, fx.case_id, &padded, None, false).unwrap();
                prop_assert_eq!(added, i == 0);
            }
            let tags = fx.core.case_tags(&cc, fx.case_id).unwrap();
            prop_assert_eq!(tags.len(), 1);
            prop_assert_eq!(&tags[0].tag, &tag);
        }
    }
}
