//! Advisory datastore locks
//!
//! Each datastore supports an advisory lock held by at most one session.
//! A `lock` request against a datastore locked elsewhere fails with
//! `lock-denied` (carrying the holder's session id); an edit against a
//! datastore locked by another session fails with `in-use`. Locks are
//! released explicitly, on session close, or on disconnect.

use parking_lot::Mutex;
use std::collections::HashMap;

use trellis_core::{Result, RpcError};

/// Table of advisory per-datastore locks
#[derive(Debug, Default)]
pub struct LockTable {
    held: Mutex<HashMap<String, u32>>,
}

impl LockTable {
    /// Create an empty lock table
    pub fn new() -> Self {
        LockTable::default()
    }

    /// Acquire the lock on `db` for `session`
    pub fn lock(&self, db: &str, session: u32) -> Result<()> {
        let mut held = self.held.lock();
        match held.get(db) {
            Some(&holder) if holder != session => Err(RpcError::lock_denied(
                format!("Lock on {} is held by session {}", db, holder),
                holder,
            )),
            Some(_) => Err(RpcError::lock_denied(
                format!("Lock on {} is already held by this session", db),
                session,
            )),
            None => {
                held.insert(db.to_string(), session);
                Ok(())
            }
        }
    }

    /// Release the lock on `db` held by `session`
    pub fn unlock(&self, db: &str, session: u32) -> Result<()> {
        let mut held = self.held.lock();
        match held.get(db) {
            Some(&holder) if holder == session => {
                held.remove(db);
                Ok(())
            }
            Some(&holder) => Err(RpcError::lock_denied(
                format!("Lock on {} is held by session {}", db, holder),
                holder,
            )),
            None => Err(RpcError::operation_failed(format!(
                "Lock on {} is not held",
                db
            ))),
        }
    }

    /// Session currently holding the lock on `db`
    pub fn holder(&self, db: &str) -> Option<u32> {
        self.held.lock().get(db).copied()
    }

    /// Check that `session` may edit `db`
    ///
    /// Fails with `in-use` when another session holds the lock. When
    /// `require_lock` is set (autolock off), the caller must itself be the
    /// holder.
    pub fn check_edit(&self, db: &str, session: u32, require_lock: bool) -> Result<()> {
        match self.holder(db) {
            Some(holder) if holder != session => Err(RpcError::in_use(format!(
                "{} is locked by session {}",
                db, holder
            ))),
            Some(_) => Ok(()),
            None if require_lock => Err(RpcError::operation_failed(format!(
                "Edit of {} requires holding its lock",
                db
            ))),
            None => Ok(()),
        }
    }

    /// Release every lock held by `session`, returning the affected stores
    pub fn release_session(&self, session: u32) -> Vec<String> {
        let mut held = self.held.lock();
        let released: Vec<String> = held
            .iter()
            .filter(|(_, &s)| s == session)
            .map(|(db, _)| db.clone())
            .collect();
        for db in &released {
            held.remove(db);
        }
        released
    }
}
