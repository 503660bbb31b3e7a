//! Shared fixture for unit tests: one acne pathway with published layouts,
//! a patient, two doctors and a care coordinator.

use std::sync::Arc;

use chrono::{Months, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::answers::AnswerInput;
use crate::compat::{AppVersion, ClientInfo, VersionRange};
use crate::config::CoreConfig;
use crate::context::{Actor, RequestContext};
use crate::core_state::{CoreState, CoreStateBuilder};
use crate::diagnosis::{DiagnosisItemInput, DiagnosisSetInput};
use crate::events::EventHandler;
use crate::layout::document::tests::choice;
use crate::layout::document::{LayoutSection, PhotoSlotSpec, Screen, SubQuestionsConfig};
use crate::layout::{LayoutDocument, LayoutUpload, Question};
use crate::models::enums::{
    LayoutPurpose, LayoutRole, LayoutVariant, Platform, ProviderRole, QuestionType, Role,
};
use crate::models::{PhotoSection, PhotoSlot, PlanSections};
use crate::visit::RouteTarget;

pub const PATHWAY: &str = "health_condition_acne";
pub const OTHER_PATHWAY: &str = "health_condition_rosacea";
/// Has a diagnosis-detail layout.
pub const ACNE_CODE: &str = "L70.0";
/// Has none.
pub const ROSACEA_CODE: &str = "L71.9";

/// Question and potential-answer ids of the published layouts.
pub mod q {
    pub const INSURANCE: i64 = 101;
    pub const INSURED_YES: i64 = 1011;
    pub const NO_INSURANCE: i64 = 1012;
    pub const MEDICAID: i64 = 1013;
    pub const ALLERGIES: i64 = 102;
    pub const TOPICAL: i64 = 103;
    pub const TOPICAL_YES: i64 = 1031;
    pub const TOPICAL_NO: i64 = 1032;
    pub const TOPICAL_NAME: i64 = 104;
    pub const FOLLOWUP_TOPICAL_YES: i64 = 2031;
    pub const FOLLOWUP_TOPICAL_NO: i64 = 2032;
    pub const FACE_PHOTOS: i64 = 105;
    pub const PROGRESS: i64 = 106;
    pub const DETAIL_SEVERITY: i64 = 201;
    pub const DETAIL_MILD: i64 = 2011;
    pub const DETAIL_SEVERE: i64 = 2012;
}

fn client() -> ClientInfo {
    ClientInfo::new(Platform::Ios, AppVersion::new(1, 5, 0))
}

pub fn ctx_for(account_id: Uuid, role: Role) -> RequestContext {
    RequestContext::new(Actor::new(account_id, role), client())
}

pub fn admin_ctx() -> RequestContext {
    ctx_for(Uuid::new_v4(), Role::Admin)
}

pub fn patient_ctx(account_id: Uuid) -> RequestContext {
    ctx_for(account_id, Role::Patient)
}

pub fn plan_sections(treatment: &str) -> PlanSections {
    PlanSections::from([("treatments".to_string(), json!([{ "drug": treatment }]))])
}

// ── Layouts ─────────────────────────────────────────────────

fn typed(id: i64, tag: &str, question_type: QuestionType) -> Question {
    Question {
        question_type,
        ..choice(id, tag, &[])
    }
}

fn insurance() -> Question {
    let mut q = choice(
        q::INSURANCE,
        "q_insurance_coverage",
        &[
            (q::INSURED_YES, "insured_yes", "Yes"),
            (q::NO_INSURANCE, "no_insurance", "I don't have insurance"),
            (q::MEDICAID, "a_medicaid", "Medicaid"),
        ],
    );
    q.required = true;
    q.prefilled_with_previous_answers = true;
    q
}

fn allergies() -> Question {
    let mut q = typed(q::ALLERGIES, "q_allergic_medication_entry", QuestionType::SingleEntry);
    q.prefilled_with_previous_answers = true;
    q
}

fn topical() -> Question {
    let mut q = choice(
        q::TOPICAL,
        "q_topical_treatments",
        &[(q::TOPICAL_YES, "a_yes", "Yes"), (q::TOPICAL_NO, "a_no", "No")],
    );
    q.question_title = Some("Uses topical treatments".into());
    q.potential_answers[0].to_alert = true;
    q.sub_questions_config = Some(SubQuestionsConfig {
        questions: vec![typed(q::TOPICAL_NAME, "q_topical_name", QuestionType::SingleEntry)],
    });
    q
}

/// Same question on the followup layout, with its own answer ids.
fn followup_topical() -> Question {
    let mut question = topical();
    question.potential_answers[0].answer_id = q::FOLLOWUP_TOPICAL_YES;
    question.potential_answers[1].answer_id = q::FOLLOWUP_TOPICAL_NO;
    question.prefilled_with_previous_answers = true;
    question
}

fn face_photos() -> Question {
    let mut q = typed(q::FACE_PHOTOS, "q_face_photos", QuestionType::PhotoSection);
    q.photo_slots = vec![
        PhotoSlotSpec { name: "front".into(), required: true },
        PhotoSlotSpec { name: "left".into(), required: false },
    ];
    q
}

fn layout(sku: &str, version: AppVersion, questions: Vec<Question>) -> LayoutDocument {
    LayoutDocument {
        pathway_tag: PATHWAY.into(),
        sku_type: sku.into(),
        version,
        sections: vec![LayoutSection {
            section_tag: "intake".into(),
            section_title: None,
            screens: vec![Screen {
                screen_type: None,
                screen_title: None,
                questions,
            }],
        }],
    }
}

fn publish(
    core: &CoreState,
    admin: &RequestContext,
    doc: LayoutDocument,
    purpose: LayoutPurpose,
    variant: LayoutVariant,
    role: LayoutRole,
    diagnosis_code: Option<&str>,
) -> Uuid {
    let upload = LayoutUpload {
        pathway_tag: PATHWAY.into(),
        purpose,
        variant,
        role,
        platform: if role == LayoutRole::Patient { Platform::Ios } else { Platform::Web },
        app_range: VersionRange::from_min(AppVersion::new(1, 0, 0)),
        diagnosis_code: diagnosis_code.map(str::to_string),
        document_json: doc.to_json().unwrap(),
    };
    let layout = core.upload_layout(admin, upload).unwrap();
    core.activate_layout(admin, layout.id).unwrap();
    layout.id
}

fn publish_layouts(core: &CoreState) -> Uuid {
    let admin = admin_ctx();
    let v1 = AppVersion::new(1, 0, 0);
    let intake = publish(
        core,
        &admin,
        layout("acne_visit", v1, vec![insurance(), allergies(), topical(), face_photos()]),
        LayoutPurpose::Intake,
        LayoutVariant::Initial,
        LayoutRole::Patient,
        None,
    );

    let progress = choice(
        q::PROGRESS,
        "q_acne_progress",
        &[(1061, "a_better", "Better"), (1062, "a_same", "About the same"), (1063, "a_worse", "Worse")],
    );
    publish(
        core,
        &admin,
        layout("acne_followup", v1, vec![insurance(), allergies(), followup_topical(), progress, face_photos()]),
        LayoutPurpose::Intake,
        LayoutVariant::Followup,
        LayoutRole::Patient,
        None,
    );

    for variant in [LayoutVariant::Initial, LayoutVariant::Followup] {
        let review = choice(301, "q_doctor_impression", &[(3011, "a_clear", "Clear presentation")]);
        publish(
            core,
            &admin,
            layout("acne_review", AppVersion::new(1, 2, 0), vec![review]),
            LayoutPurpose::Review,
            variant,
            LayoutRole::Doctor,
            None,
        );
    }

    let severity = choice(
        q::DETAIL_SEVERITY,
        "q_acne_severity",
        &[(q::DETAIL_MILD, "a_mild", "Mild"), (q::DETAIL_SEVERE, "a_severe", "Severe")],
    );
    publish(
        core,
        &admin,
        layout("acne_diagnosis", v1, vec![severity]),
        LayoutPurpose::DiagnosisDetail,
        LayoutVariant::Initial,
        LayoutRole::Doctor,
        Some(ACNE_CODE),
    );
    intake
}

// ═══════════════════════════════════════════════════════════
// Fixture
// ═══════════════════════════════════════════════════════════

pub struct Fixture {
    pub core: Arc<CoreState>,
    pub intake_layout_id: Uuid,
    /// Patient record id.
    pub patient_id: Uuid,
    pub patient_account: Uuid,
    pub other_patient_account: Uuid,
    pub doctor_id: Uuid,
    pub other_doctor_id: Uuid,
    pub cc_id: Uuid,
    /// Nil until `opened`.
    pub case_id: Uuid,
    pub visit_id: Uuid,
    /// Nil until `treated`.
    pub treated_plan_id: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        Self::setup(CoreState::builder(CoreConfig::default()), 30)
    }

    pub fn with_config(config: CoreConfig) -> Self {
        Self::setup(CoreState::builder(config), 30)
    }

    pub fn with_patient_age(years: u32) -> Self {
        Self::setup(CoreState::builder(CoreConfig::default()), years)
    }

    /// Built-in subscribers plus `handler`.
    pub fn with_subscriber(handler: Arc<dyn EventHandler>) -> Self {
        Self::setup(CoreState::builder(CoreConfig::default()).subscriber(handler), 30)
    }

    pub fn with_open_visit() -> Self {
        Self::new().opened()
    }

    pub fn with_submitted_visit() -> Self {
        Self::new().submitted()
    }

    pub fn with_routed_visit() -> Self {
        Self::new().routed()
    }

    pub fn with_reviewing_visit() -> Self {
        Self::new().reviewing()
    }

    pub fn with_treated_visit() -> Self {
        Self::new().treated()
    }

    fn setup(builder: CoreStateBuilder, patient_age: u32) -> Self {
        let core = builder.build().unwrap();
        core.provision_pathway(PATHWAY, "Acne").unwrap();
        core.provision_pathway(OTHER_PATHWAY, "Rosacea").unwrap();
        core.provision_diagnosis_code(ACNE_CODE, "Acne vulgaris").unwrap();
        core.provision_diagnosis_code(ROSACEA_CODE, "Rosacea, unspecified").unwrap();

        let today = Utc::now().date_naive();
        let born = today
            .checked_sub_months(Months::new(12 * patient_age + 1))
            .unwrap();
        let patient_account = Uuid::new_v4();
        let patient = core.provision_patient(patient_account, "Ada", born).unwrap();
        let other_patient_account = Uuid::new_v4();
        core.provision_patient(other_patient_account, "Grace", born).unwrap();

        let doctor_id = Uuid::new_v4();
        core.provision_provider(doctor_id, ProviderRole::Doctor, "Dr. Lee", &[PATHWAY])
            .unwrap();
        let other_doctor_id = Uuid::new_v4();
        core.provision_provider(other_doctor_id, ProviderRole::Doctor, "Dr. Okafor", &[PATHWAY])
            .unwrap();
        let cc_id = Uuid::new_v4();
        core.provision_provider(cc_id, ProviderRole::CareCoordinator, "Jo", &[PATHWAY])
            .unwrap();

        let intake_layout_id = publish_layouts(&core);
        Self {
            core: Arc::new(core),
            intake_layout_id,
            patient_id: patient.id,
            patient_account,
            other_patient_account,
            doctor_id,
            other_doctor_id,
            cc_id,
            case_id: Uuid::nil(),
            visit_id: Uuid::nil(),
            treated_plan_id: Uuid::nil(),
        }
    }

    // ── Contexts ────────────────────────────────────────────

    pub fn patient_actor(&self) -> Actor {
        Actor::new(self.patient_account, Role::Patient)
    }

    pub fn patient_ctx(&self) -> RequestContext {
        patient_ctx(self.patient_account)
    }

    pub fn other_patient_ctx(&self) -> RequestContext {
        patient_ctx(self.other_patient_account)
    }

    pub fn doctor_ctx(&self) -> RequestContext {
        ctx_for(self.doctor_id, Role::Doctor)
    }

    pub fn other_doctor_ctx(&self) -> RequestContext {
        ctx_for(self.other_doctor_id, Role::Doctor)
    }

    pub fn cc_ctx(&self) -> RequestContext {
        ctx_for(self.cc_id, Role::CareCoordinator)
    }

    /// A freshly provisioned doctor working only in `pathways`.
    pub fn doctor_in(&self, pathways: &[&str]) -> RequestContext {
        let id = Uuid::new_v4();
        self.core
            .provision_provider(id, ProviderRole::Doctor, "Dr. Elsewhere", pathways)
            .unwrap();
        ctx_for(id, Role::Doctor)
    }

    // ── Visit stages ────────────────────────────────────────

    pub fn opened(mut self) -> Self {
        let ctx = self.patient_ctx();
        let case = self.core.create_case(&ctx, PATHWAY).unwrap();
        let visit = self.core.open_visit(&ctx, case.id).unwrap();
        self.case_id = case.id;
        self.visit_id = visit.id;
        self
    }

    pub fn submitted(self) -> Self {
        let fx = self.opened();
        let ctx = fx.patient_ctx();
        fx.answer_required(&ctx);
        fx.core.submit_visit(&ctx, fx.visit_id).unwrap();
        fx
    }

    /// Charged and waiting in the unclaimed queue.
    pub fn routed(self) -> Self {
        let fx = self.submitted();
        let admin = admin_ctx();
        fx.core.mark_visit_charged(&admin, fx.visit_id).unwrap();
        fx.core.route_visit(&admin, fx.visit_id, RouteTarget::Queue).unwrap();
        fx
    }

    /// Claimed by `doctor_id` and under review.
    pub fn reviewing(self) -> Self {
        let fx = self.routed();
        let doctor = fx.doctor_ctx();
        fx.core.claim_case(&doctor, fx.case_id).unwrap();
        fx.core.begin_review(&doctor, fx.visit_id).unwrap();
        fx
    }

    /// Diagnosed with acne and treated with a submitted plan.
    pub fn treated(self) -> Self {
        let mut fx = self.reviewing();
        let doctor = fx.doctor_ctx();
        fx.core
            .attach_diagnosis_set(
                &doctor,
                fx.visit_id,
                DiagnosisSetInput {
                    items: vec![DiagnosisItemInput::code(ACNE_CODE)],
                    ..DiagnosisSetInput::default()
                },
            )
            .unwrap();
        fx.treated_plan_id = fx.write_plan(fx.case_id);
        fx
    }

    fn write_plan(&self, case_id: Uuid) -> Uuid {
        let doctor = self.doctor_ctx();
        let draft = self.core.create_draft(&doctor, case_id, None, None).unwrap();
        self.core
            .update_draft(&doctor, draft.id, plan_sections("Benzoyl peroxide 5%"))
            .unwrap();
        self.core.submit_draft(&doctor, draft.id).unwrap().id
    }

    // ── Answers ─────────────────────────────────────────────

    pub fn answer_required(&self, ctx: &RequestContext) {
        self.answer_required_on(ctx, self.visit_id, "s0");
    }

    /// Insured, one front photo; counter 1 of `session`.
    pub fn answer_required_on(&self, ctx: &RequestContext, visit_id: Uuid, session: &str) {
        let photos = vec![PhotoSection {
            name: "face".into(),
            slots: vec![PhotoSlot {
                slot_name: "front".into(),
                blob_id: Uuid::new_v4().to_string(),
            }],
        }];
        self.core
            .put_answers(
                ctx,
                visit_id,
                session,
                1,
                &[
                    AnswerInput::select(q::INSURANCE, q::INSURED_YES),
                    AnswerInput::photos(q::FACE_PHOTOS, photos),
                ],
            )
            .unwrap();
    }

    pub fn answer_insurance_on(
        &self,
        ctx: &RequestContext,
        visit_id: Uuid,
        answer_id: i64,
        session: &str,
        counter: i64,
    ) -> Uuid {
        self.core
            .put_answers(ctx, visit_id, session, counter, &[AnswerInput::select(q::INSURANCE, answer_id)])
            .unwrap()[0]
    }

    // ── Multi-visit flows ───────────────────────────────────

    /// Treat the submitted current visit through `doctor_id` and open a
    /// followup. Returns the followup visit id.
    pub fn treat_and_follow_up(&self) -> Uuid {
        let admin = admin_ctx();
        let doctor = self.doctor_ctx();
        self.core.mark_visit_charged(&admin, self.visit_id).unwrap();
        self.core
            .route_visit(&admin, self.visit_id, RouteTarget::Doctor(self.doctor_id))
            .unwrap();
        self.core.begin_review(&doctor, self.visit_id).unwrap();
        self.write_plan(self.case_id);
        self.core.create_followup(&self.patient_ctx(), self.case_id).unwrap().id
    }

    /// Run a followup of a treated case all the way to a submitted plan.
    /// Returns the new plan id.
    pub fn treat_followup(&self) -> Uuid {
        let patient = self.patient_ctx();
        let admin = admin_ctx();
        let followup = self.core.create_followup(&patient, self.case_id).unwrap();
        self.answer_required_on(&patient, followup.id, "followup");
        self.core.submit_visit(&patient, followup.id).unwrap();
        self.core.mark_visit_charged(&admin, followup.id).unwrap();
        self.core.route_visit(&admin, followup.id, RouteTarget::Queue).unwrap();
        self.core.begin_review(&self.doctor_ctx(), followup.id).unwrap();
        self.write_plan(self.case_id)
    }
}
