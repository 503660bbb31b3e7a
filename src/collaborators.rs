//! Interfaces to services the core depends on but does not own.
//!
//! Both traits are object-safe and `Send + Sync` so they can be shared
//! through `Arc<dyn _>`. In-memory implementations back tests and demos.

use std::collections::HashMap;
use std::io::Read;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::{Actor, Deadline};
use crate::error::CoreError;

/// Account record as the identity service knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub account_id: Uuid,
    pub email: String,
    pub actor: Actor,
}

/// Resolves credentials to actors.
pub trait IdentityProvider: Send + Sync {
    fn authenticate(&self, token: &str, deadline: Deadline) -> Result<Actor, CoreError>;

    fn account_for_email(&self, email: &str, deadline: Deadline) -> Result<Account, CoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Opaque binary storage for photos and attachments.
pub trait BlobStore: Send + Sync {
    fn put(
        &self,
        name: &str,
        data: &mut dyn Read,
        mime: &str,
        deadline: Deadline,
    ) -> Result<String, CoreError>;

    fn get(&self, blob_id: &str, deadline: Deadline) -> Result<(Vec<u8>, BlobMetadata), CoreError>;

    fn signed_url(
        &self,
        blob_id: &str,
        ttl: std::time::Duration,
        deadline: Deadline,
    ) -> Result<String, CoreError>;
}

fn lock_failed() -> CoreError {
    CoreError::Dependency {
        service: "memory",
        message: "lock poisoned".into(),
    }
}

// ═══════════════════════════════════════════════════════════
// In-memory implementations
// ═══════════════════════════════════════════════════════════

/// Token table keyed by bearer token.
#[derive(Default)]
pub struct StaticIdentityProvider {
    accounts: RwLock<HashMap<String, Account>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: &str, account: Account) -> Result<(), CoreError> {
        self.accounts
            .write()
            .map_err(|_| lock_failed())?
            .insert(token.to_string(), account);
        Ok(())
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn authenticate(&self, token: &str, deadline: Deadline) -> Result<Actor, CoreError> {
        deadline.check("identity")?;
        let accounts = self.accounts.read().map_err(|_| lock_failed())?;
        accounts
            .get(token)
            .map(|a| a.actor)
            .ok_or_else(|| CoreError::denied("unknown token"))
    }

    fn account_for_email(&self, email: &str, deadline: Deadline) -> Result<Account, CoreError> {
        deadline.check("identity")?;
        let accounts = self.accounts.read().map_err(|_| lock_failed())?;
        accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or_else(|| CoreError::not_found("account", email))
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, (Vec<u8>, BlobMetadata)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(
        &self,
        name: &str,
        data: &mut dyn Read,
        mime: &str,
        deadline: Deadline,
    ) -> Result<String, CoreError> {
        deadline.check("blob")?;
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes).map_err(|e| CoreError::Dependency {
            service: "blob",
            message: e.to_string(),
        })?;
        let id = Uuid::new_v4().to_string();
        let meta = BlobMetadata {
            name: name.to_string(),
            mime: mime.to_string(),
            size: bytes.len() as u64,
            created_at: Utc::now(),
        };
        self.blobs
            .write()
            .map_err(|_| lock_failed())?
            .insert(id.clone(), (bytes, meta));
        Ok(id)
    }

    fn get(&self, blob_id: &str, deadline: Deadline) -> Result<(Vec<u8>, BlobMetadata), CoreError> {
        deadline.check("blob")?;
        self.blobs
            .read()
            .map_err(|_| lock_failed())?
            .get(blob_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("blob", blob_id))
    }

    fn signed_url(
        &self,
        blob_id: &str,
        ttl: std::time::Duration,
        deadline: Deadline,
    ) -> Result<String, CoreError> {
        deadline.check("blob")?;
        if !self.blobs.read().map_err(|_| lock_failed())?.contains_key(blob_id) {
            return Err(CoreError::not_found("blob", blob_id));
        }
        let expires = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| CoreError::out_of_range(format!("signed url ttl {}s", ttl.as_secs())))?;
        Ok(format!("memory://{blob_id}?expires={}", expires.timestamp()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::Role;
    use std::time::Duration;

    #[test]
    fn traits_are_object_safe() {
        fn _assert_identity(_: &dyn IdentityProvider) {}
        fn _assert_blob(_: &dyn BlobStore) {}
    }

    #[test]
    fn blob_roundtrip_and_signed_url() {
        let store = MemoryBlobStore::new();
        let id = store
            .put("face.jpg", &mut &b"jpeg"[..], "image/jpeg", Deadline::none())
            .unwrap();
        let (bytes, meta) = store.get(&id, Deadline::none()).unwrap();
        assert_eq!(bytes, b"jpeg");
        assert_eq!(meta.size, 4);
        let url = store
            .signed_url(&id, Duration::from_secs(60), Deadline::none())
            .unwrap();
        assert!(url.starts_with(&format!("memory://{id}")));
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        let store = MemoryBlobStore::new();
        let id = store
            .put("face.jpg", &mut &b"jpeg"[..], "image/jpeg", Deadline::none())
            .unwrap();
        let err = store
            .signed_url(&id, Duration::from_secs(u64::MAX / 2), Deadline::none())
            .unwrap_err();
        assert_eq!(err.code(), "out_of_range");
    }

    #[test]
    fn missing_blob_is_not_found() {
        let store = MemoryBlobStore::new();
        let err = store.get("nope", Deadline::none()).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn expired_deadline_short_circuits() {
        let store = MemoryBlobStore::new();
        let err = store
            .put("a", &mut &b""[..], "text/plain", Deadline::after(Duration::ZERO))
            .unwrap_err();
        assert_eq!(err.code(), "dependency");
    }

    #[test]
    fn identity_lookup() {
        let identity = StaticIdentityProvider::new();
        let account_id = Uuid::new_v4();
        identity
            .register(
                "tok",
                Account {
                    account_id,
                    email: "pat@example.com".into(),
                    actor: Actor::new(account_id, Role::Patient),
                },
            )
            .unwrap();
        let actor = identity.authenticate("tok", Deadline::none()).unwrap();
        assert_eq!(actor.account_id, account_id);
        assert!(identity.authenticate("bad", Deadline::none()).is_err());
        let account = identity
            .account_for_email("PAT@example.com", Deadline::none())
            .unwrap();
        assert_eq!(account.account_id, account_id);
    }
}
