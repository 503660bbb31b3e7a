//! Shared workflow state.
//!
//! `CoreState` owns the store, configuration, the read-only feature table, the
//! layout cache, the event bus and the blob store collaborator. It is `Send +
//! Sync` and meant to live in an `Arc` shared by every transport. Component
//! operations are added by `impl CoreState` blocks in their own modules.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Transaction;
use uuid::Uuid;

use crate::collaborators::{BlobStore, MemoryBlobStore};
use crate::compat::{FeatureRegistry, LayoutSelectionKey};
use crate::config::CoreConfig;
use crate::context::{CancelHandle, RequestContext};
use crate::db;
use crate::error::CoreError;
use crate::events::{self, EventBus, EventHandler};
use crate::layout::LayoutCache;
use crate::models::enums::{PathwayStatus, ProviderRole};
use crate::models::{DiagnosisCode, Pathway, Patient, Provider};
use crate::store::Store;

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    store: Store,
    config: CoreConfig,
    features: FeatureRegistry,
    layouts: LayoutCache,
    events: EventBus,
    blobs: Arc<dyn BlobStore>,
}

impl CoreState {
    pub fn builder(config: CoreConfig) -> CoreStateBuilder {
        CoreStateBuilder::new(config)
    }

    /// In-memory state with the built-in subscribers, for tests and demos.
    pub fn in_memory() -> Result<Self, CoreError> {
        Self::builder(CoreConfig::default()).build()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn features(&self) -> &FeatureRegistry {
        &self.features
    }

    pub fn layouts(&self) -> &LayoutCache {
        &self.layouts
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    /// Run a request's write; the request's cancel handle governs the commit.
    pub(crate) fn write<T, F>(&self, ctx: &RequestContext, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, CoreError>,
    {
        self.store.write(&ctx.cancel, f)
    }

    /// Commit `f` and wake the dispatcher; used by operations that emit events.
    pub(crate) fn write_and_notify<T, F>(&self, ctx: &RequestContext, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, CoreError>,
    {
        let out = self.store.write(&ctx.cancel, f)?;
        self.events.notify();
        Ok(out)
    }

    // ── Compatibility gate ──────────────────────────────────

    /// Capability flags for the caller's client.
    pub fn capabilities(&self, ctx: &RequestContext) -> std::collections::BTreeSet<String> {
        self.features.capabilities(&ctx.client, ctx.actor.role)
    }

    pub fn layout_selection_key(&self, ctx: &RequestContext) -> LayoutSelectionKey {
        self.features.layout_selection_key(&ctx.client, ctx.actor.role)
    }

    // ── Provisioning from upstream services ─────────────────

    pub fn provision_pathway(&self, tag: &str, name: &str) -> Result<Pathway, CoreError> {
        if tag.trim().is_empty() {
            return Err(CoreError::missing("pathway tag"));
        }
        let pathway = Pathway {
            tag: tag.to_string(),
            name: name.to_string(),
            status: PathwayStatus::Active,
        };
        self.store.write(&CancelHandle::new(), |tx| {
            db::insert_pathway(tx, &pathway)?;
            Ok(())
        })?;
        Ok(pathway)
    }

    pub fn provision_patient(
        &self,
        account_id: Uuid,
        first_name: &str,
        date_of_birth: chrono::NaiveDate,
    ) -> Result<Patient, CoreError> {
        if date_of_birth > Utc::now().date_naive() {
            return Err(CoreError::out_of_range("date of birth is in the future"));
        }
        let patient = Patient {
            id: Uuid::new_v4(),
            account_id,
            first_name: first_name.to_string(),
            date_of_birth,
        };
        self.store.write(&CancelHandle::new(), |tx| {
            db::insert_patient(tx, &patient)?;
            Ok(())
        })?;
        Ok(patient)
    }

    pub fn provision_provider(
        &self,
        account_id: Uuid,
        role: ProviderRole,
        display_name: &str,
        pathways: &[&str],
    ) -> Result<Provider, CoreError> {
        let provider = Provider {
            account_id,
            role,
            display_name: display_name.to_string(),
        };
        self.store.write(&CancelHandle::new(), |tx| {
            db::insert_provider(tx, &provider)?;
            for tag in pathways {
                if db::get_pathway(tx, tag)?.is_none() {
                    return Err(CoreError::not_found("pathway", tag));
                }
                db::add_provider_pathway(tx, account_id, tag)?;
            }
            Ok(())
        })?;
        Ok(provider)
    }

    pub fn provision_diagnosis_code(&self, code_id: &str, name: &str) -> Result<(), CoreError> {
        let code = DiagnosisCode {
            code_id: code_id.to_string(),
            name: name.to_string(),
        };
        self.store.write(&CancelHandle::new(), |tx| {
            db::upsert_diagnosis_code(tx, &code)?;
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════

pub struct CoreStateBuilder {
    config: CoreConfig,
    features: FeatureRegistry,
    blobs: Option<Arc<dyn BlobStore>>,
    store: Option<Store>,
    subscribers: Vec<Arc<dyn EventHandler>>,
    builtin_subscribers: bool,
}

impl CoreStateBuilder {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            features: FeatureRegistry::default(),
            blobs: None,
            store: None,
            subscribers: Vec::new(),
            builtin_subscribers: true,
        }
    }

    pub fn features(mut self, features: FeatureRegistry) -> Self {
        self.features = features;
        self
    }

    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Register an extra subscriber; order of registration is dispatch order.
    pub fn subscriber(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.subscribers.push(handler);
        self
    }

    pub fn without_builtin_subscribers(mut self) -> Self {
        self.builtin_subscribers = false;
        self
    }

    pub fn build(self) -> Result<CoreState, CoreError> {
        let store = match self.store {
            Some(store) => store,
            None => match &self.config.database_path {
                Some(path) => Store::open(path)?,
                None => Store::open_in_memory()?,
            },
        };

        let mut subscribers = if self.builtin_subscribers {
            events::handlers::builtin()
        } else {
            Vec::new()
        };
        subscribers.extend(self.subscribers);

        let names: Vec<&str> = subscribers.iter().map(|s| s.name()).collect();
        tracing::info!(subscribers = ?names, "workflow core ready");

        let events = EventBus::new(subscribers, self.config.event_buffer);
        Ok(CoreState {
            store,
            features: self.features,
            layouts: LayoutCache::new(),
            events,
            blobs: self
                .blobs
                .unwrap_or_else(|| Arc::new(MemoryBlobStore::new())),
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_state_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CoreState>();
    }

    #[test]
    fn provisions_people() {
        let core = CoreState::in_memory().unwrap();
        core.provision_pathway("health_condition_acne", "Acne").unwrap();
        let doctor = Uuid::new_v4();
        core.provision_provider(doctor, ProviderRole::Doctor, "Dr. Lee", &["health_condition_acne"])
            .unwrap();
        let eligible = core
            .store()
            .read(|conn| {
                Ok(db::is_provider_eligible(
                    conn,
                    doctor,
                    ProviderRole::Doctor,
                    "health_condition_acne",
                )?)
            })
            .unwrap();
        assert!(eligible);
    }

    #[test]
    fn provider_with_unknown_pathway_is_rolled_back() {
        let core = CoreState::in_memory().unwrap();
        let doctor = Uuid::new_v4();
        let err = core
            .provision_provider(doctor, ProviderRole::Doctor, "Dr. Lee", &["nope"])
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
        let provider = core.store().read(|conn| Ok(db::get_provider(conn, doctor)?)).unwrap();
        assert!(provider.is_none());
    }

    #[test]
    fn future_birth_date_rejected() {
        let core = CoreState::in_memory().unwrap();
        let tomorrow = Utc::now().date_naive() + chrono::Duration::days(2);
        let err = core
            .provision_patient(Uuid::new_v4(), "Ada", tomorrow)
            .unwrap_err();
        assert_eq!(err.code(), "out_of_range");
    }
}
