//! Per-account exclusive locks
//!
//! Every mutating operation locks the account rows it touches for its
//! full duration; operations on disjoint accounts run in parallel. Locks
//! are acquired with a bounded wait, and multi-account operations always
//! acquire in canonical ascending-identifier order regardless of the
//! source/destination roles, so two opposed transfers over the same pair
//! can never deadlock.

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

/// Exclusive hold on one account row
///
/// Released on drop. Held inside a unit of work until commit or abort.
pub struct AccountGuard {
    id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl AccountGuard {
    /// The locked account
    pub fn account_id(&self) -> Uuid {
        self.id
    }
}

impl std::fmt::Debug for AccountGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountGuard").field("id", &self.id).finish()
    }
}

/// Process-wide account lock table
///
/// One mutex per account, created on first use. Accounts are never
/// deleted in normal operation, so entries live for the account's
/// lifetime and the table is bounded by the account population.
#[derive(Debug)]
pub struct LockManager {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    wait_timeout: Duration,
}

impl LockManager {
    /// Create a lock manager with the given maximum lock wait
    pub fn new(wait_timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            wait_timeout,
        }
    }

    fn cell(&self, id: Uuid) -> Arc<Mutex<()>> {
        // Clone out of the shard before awaiting; holding the map entry
        // across an await would block every other account in the shard.
        self.locks.entry(id).or_default().value().clone()
    }

    /// Acquire the exclusive lock for one account
    ///
    /// Fails `LockTimeout` if the holder does not release within the
    /// configured wait.
    pub async fn acquire(&self, id: Uuid) -> Result<AccountGuard> {
        let cell = self.cell(id);

        let guard = timeout(self.wait_timeout, cell.lock_owned())
            .await
            .map_err(|_| Error::LockTimeout(id))?;

        Ok(AccountGuard { id, _guard: guard })
    }

    /// Acquire the exclusive locks for two accounts in canonical order
    ///
    /// The acquisition order is ascending by identifier, independent of
    /// argument order: concurrent operations over the same pair always
    /// request locks in the same relative order.
    pub async fn acquire_pair(&self, a: Uuid, b: Uuid) -> Result<(AccountGuard, AccountGuard)> {
        debug_assert_ne!(a, b, "pair acquisition requires distinct accounts");

        let (first, second) = if a <= b { (a, b) } else { (b, a) };

        let first_guard = self.acquire(first).await?;
        let second_guard = self.acquire(second).await?;

        Ok((first_guard, second_guard))
    }
}
