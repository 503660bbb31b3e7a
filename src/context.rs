//! Request-scoped context: who is calling, from what client, and how long
//! they are willing to wait.

use std::cell::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use uuid::Uuid;

use crate::collaborators::IdentityProvider;
use crate::compat::ClientInfo;
use crate::db;
use crate::error::CoreError;
use crate::models::enums::Role;
use crate::models::Patient;

/// Authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub account_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(account_id: Uuid, role: Role) -> Self {
        Self { account_id, role }
    }

    pub fn is(&self, role: Role) -> bool {
        self.role == role
    }
}

// ═══════════════════════════════════════════════════════════
// Cancellation and deadlines
// ═══════════════════════════════════════════════════════════

/// Cooperative cancellation flag shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), CoreError> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Point in time after which collaborator calls give up.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Fail with a dependency error naming `service` once expired.
    pub fn check(&self, service: &'static str) -> Result<(), CoreError> {
        if self.is_expired() {
            Err(CoreError::Dependency {
                service,
                message: "deadline exceeded".into(),
            })
        } else {
            Ok(())
        }
    }
}

// ═══════════════════════════════════════════════════════════
// RequestContext
// ═══════════════════════════════════════════════════════════

/// Everything an operation needs to know about the current request.
///
/// Lives for one request only; the patient lookup cache dies with it.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub actor: Actor,
    pub client: ClientInfo,
    pub cancel: CancelHandle,
    pub deadline: Deadline,
    patient: OnceCell<Option<Patient>>,
}

impl RequestContext {
    pub fn new(actor: Actor, client: ClientInfo) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            actor,
            client,
            cancel: CancelHandle::new(),
            deadline: Deadline::none(),
            patient: OnceCell::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve a bearer token through the identity collaborator.
    pub fn authenticate(
        identity: &dyn IdentityProvider,
        token: &str,
        client: ClientInfo,
        deadline: Deadline,
    ) -> Result<Self, CoreError> {
        deadline.check("identity")?;
        let actor = identity.authenticate(token, deadline)?;
        tracing::debug!(account = %actor.account_id, role = %actor.role, "authenticated");
        Ok(Self::new(actor, client).with_deadline(deadline))
    }

    /// The patient record behind the actor, looked up once per request.
    pub fn patient(&self, conn: &Connection) -> Result<Option<Patient>, CoreError> {
        if let Some(cached) = self.patient.get() {
            return Ok(cached.clone());
        }
        let found = if self.actor.is(Role::Patient) {
            db::get_patient_by_account(conn, self.actor.account_id)?
        } else {
            None
        };
        Ok(self.patient.get_or_init(|| found).clone())
    }

    /// Like `patient` but the actor must be a registered patient.
    pub fn require_patient(&self, conn: &Connection) -> Result<Patient, CoreError> {
        self.patient(conn)?
            .ok_or_else(|| CoreError::denied("actor is not a registered patient"))
    }

    pub fn require_role(&self, roles: &[Role]) -> Result<(), CoreError> {
        if roles.contains(&self.actor.role) {
            Ok(())
        } else {
            Err(CoreError::denied(format!(
                "role {} may not perform this operation",
                self.actor.role
            )))
        }
    }
}
