//! What the pipeline and the care team leave on a case: tags, alerts, notes
//! and scheduled messages.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::care_team::{authorize, Operation};
use crate::context::RequestContext;
use crate::core_state::CoreState;
use crate::db;
use crate::error::CoreError;
use crate::models::enums::{MessageStatus, Role};
use crate::models::{Alert, CaseNote, CaseTag, ScheduledMessage};

fn normalize_tag(tag: &str) -> Result<String, CoreError> {
    let tag = tag.trim().to_lowercase();
    if tag.is_empty() {
        return Err(CoreError::missing("tag"));
    }
    Ok(tag)
}

const CLINICIANS: [Role; 3] = [Role::Doctor, Role::CareCoordinator, Role::Admin];

impl CoreState {
    // ── Tags ────────────────────────────────────────────────

    /// Returns false when the tag was already on the case.
    pub fn tag_case(
        &self,
        ctx: &RequestContext,
        case_id: Uuid,
        tag: &str,
        trigger_time: Option<DateTime<Utc>>,
        hidden: bool,
    ) -> Result<bool, CoreError> {
        let tag = normalize_tag(tag)?;
        self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            authorize(tx, ctx, Operation::Tag, &case)?;
            let added = db::add_case_tag(tx, case.id, &tag, trigger_time, hidden, Utc::now())?;
            if added {
                tracing::info!(case = %case.id, tag = %tag, "case tagged");
            }
            Ok(added)
        })
    }

    pub fn untag_case(&self, ctx: &RequestContext, case_id: Uuid, tag: &str) -> Result<bool, CoreError> {
        let tag = normalize_tag(tag)?;
        self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            authorize(tx, ctx, Operation::Tag, &case)?;
            Ok(db::remove_case_tag(tx, case.id, &tag)?)
        })
    }

    /// Patients do not see hidden tags.
    pub fn case_tags(&self, ctx: &RequestContext, case_id: Uuid) -> Result<Vec<CaseTag>, CoreError> {
        self.store().read(|conn| {
            let case = db::get_case(conn, case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            let mut tags = db::tags_for_case(conn, case.id)?;
            if ctx.actor.is(Role::Patient) {
                tags.retain(|t| !t.hidden);
            }
            Ok(tags)
        })
    }

    pub fn cases_with_tag(&self, ctx: &RequestContext, tag: &str) -> Result<Vec<Uuid>, CoreError> {
        ctx.require_role(&[Role::CareCoordinator, Role::Admin])?;
        let tag = normalize_tag(tag)?;
        self.store().read(|conn| Ok(db::cases_with_tag(conn, &tag)?))
    }

    // ── Alerts ──────────────────────────────────────────────

    pub fn case_alerts(&self, ctx: &RequestContext, case_id: Uuid) -> Result<Vec<Alert>, CoreError> {
        ctx.require_role(&CLINICIANS)?;
        self.store().read(|conn| {
            let case = db::get_case(conn, case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            Ok(db::alerts_for_case(conn, case.id)?)
        })
    }

    pub fn visit_alerts(&self, ctx: &RequestContext, visit_id: Uuid) -> Result<Vec<Alert>, CoreError> {
        ctx.require_role(&CLINICIANS)?;
        self.store().read(|conn| {
            let visit = db::get_visit(conn, visit_id)?;
            let case = db::get_case(conn, visit.case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            Ok(db::alerts_for_visit(conn, visit.id)?)
        })
    }

    pub fn dismiss_alert(&self, ctx: &RequestContext, alert_id: Uuid) -> Result<Alert, CoreError> {
        self.write(ctx, |tx| {
            let alert = db::get_alert(tx, alert_id)?;
            let case = db::get_case(tx, alert.case_id)?;
            authorize(tx, ctx, Operation::AddNote, &case)?;
            if !alert.dismissable {
                return Err(CoreError::invalid("alert cannot be dismissed"));
            }
            if alert.dismissed_at.is_none() {
                db::dismiss_alert(tx, alert.id, Utc::now())?;
            }
            Ok(db::get_alert(tx, alert.id)?)
        })
    }

    // ── Notes ───────────────────────────────────────────────

    pub fn add_note(
        &self,
        ctx: &RequestContext,
        case_id: Uuid,
        text: &str,
        internal: bool,
    ) -> Result<CaseNote, CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::missing("text"));
        }
        self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            authorize(tx, ctx, Operation::AddNote, &case)?;
            let note = CaseNote {
                id: Uuid::new_v4(),
                case_id: case.id,
                author_id: Some(ctx.actor.account_id),
                internal,
                text: text.trim().to_string(),
                created_at: Utc::now(),
            };
            db::insert_note(tx, &note)?;
            Ok(note)
        })
    }

    /// Patients only see notes meant for them.
    pub fn case_notes(&self, ctx: &RequestContext, case_id: Uuid) -> Result<Vec<CaseNote>, CoreError> {
        self.store().read(|conn| {
            let case = db::get_case(conn, case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            let mut notes = db::notes_for_case(conn, case.id)?;
            if ctx.actor.is(Role::Patient) {
                notes.retain(|n| !n.internal);
            }
            Ok(notes)
        })
    }

    // ── Scheduled messages ──────────────────────────────────

    pub fn case_messages(&self, ctx: &RequestContext, case_id: Uuid) -> Result<Vec<ScheduledMessage>, CoreError> {
        ctx.require_role(&[Role::CareCoordinator, Role::Admin])?;
        self.store().read(|conn| {
            let case = db::get_case(conn, case_id)?;
            authorize(conn, ctx, Operation::ReadCase, &case)?;
            Ok(db::messages_for_case(conn, case.id)?)
        })
    }

    /// Messages the delivery sweeper should send now.
    pub fn due_messages(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledMessage>, CoreError> {
        ctx.require_role(&[Role::Admin])?;
        self.store().read(|conn| Ok(db::due_messages(conn, now, limit)?))
    }

    pub fn mark_message_sent(&self, ctx: &RequestContext, message_id: Uuid) -> Result<ScheduledMessage, CoreError> {
        self.complete_message(ctx, message_id, MessageStatus::Sent, None)
    }

    pub fn mark_message_error(
        &self,
        ctx: &RequestContext,
        message_id: Uuid,
        error: &str,
    ) -> Result<ScheduledMessage, CoreError> {
        self.complete_message(ctx, message_id, MessageStatus::Error, Some(error))
    }

    fn complete_message(
        &self,
        ctx: &RequestContext,
        message_id: Uuid,
        status: MessageStatus,
        error: Option<&str>,
    ) -> Result<ScheduledMessage, CoreError> {
        ctx.require_role(&[Role::Admin])?;
        self.write(ctx, |tx| {
            let message = db::get_message(tx, message_id)?;
            if !db::complete_message(tx, message.id, status, error, Utc::now())? {
                return Err(CoreError::transition("message", message.status, status));
            }
            if status == MessageStatus::Error {
                tracing::warn!(message = %message.id, template = %message.template_id, error = ?error, "message delivery failed");
            }
            Ok(db::get_message(tx, message.id)?)
        })
    }

    /// Cancel pending messages of one kind on a case.
    pub fn deactivate_messages(
        &self,
        ctx: &RequestContext,
        case_id: Uuid,
        event_type: &str,
    ) -> Result<usize, CoreError> {
        ctx.require_role(&[Role::CareCoordinator, Role::Admin])?;
        self.write(ctx, |tx| {
            let case = db::get_case(tx, case_id)?;
            authorize(tx, ctx, Operation::ReadCase, &case)?;
            let count = db::deactivate_messages(tx, case.id, event_type, Utc::now())?;
            tracing::info!(case = %case.id, event_type, count, "messages deactivated");
            Ok(count)
        })
    }
}
