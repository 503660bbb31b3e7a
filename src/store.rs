//! Transactional access to the workflow database.
//!
//! One connection guarded by a mutex. Writes run in `IMMEDIATE` transactions so
//! the compare-and-set updates inside them see a stable snapshot; cancellation
//! is honored up to the commit and ignored afterwards.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::context::CancelHandle;
use crate::db;
use crate::error::CoreError;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(CoreError::internal)?;
        }
        let conn = db::open_database(path)?;
        tracing::info!(path = %path.display(), "workflow store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = db::open_memory_database()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CoreError> {
        self.conn
            .lock()
            .map_err(|_| CoreError::internal("store lock poisoned"))
    }

    /// Run `f` against the connection without a transaction.
    pub fn read<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, CoreError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction; any error or a cancellation before
    /// commit rolls everything back.
    pub fn write<T, F>(&self, cancel: &CancelHandle, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, CoreError>,
    {
        cancel.check()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        if cancel.is_cancelled() {
            tracing::debug!("write cancelled before commit, rolling back");
            return Err(CoreError::Cancelled);
        }
        tx.commit()?;
        Ok(out)
    }
}
