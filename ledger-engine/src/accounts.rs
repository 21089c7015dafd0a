//! Account store
//!
//! CRUD and locked access to account rows. The invariants the rest of
//! the engine relies on are enforced here, at the storage boundary:
//! (owner, currency) uniqueness, nonnegative balances, and the strictly
//! increasing version on every balance mutation.

use crate::{
    error::{Error, Result},
    locks::LockManager,
    storage::{Storage, UnitOfWork},
    types::{Account, Currency},
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Store for account rows
#[derive(Debug)]
pub struct AccountStore {
    storage: Arc<Storage>,
    locks: Arc<LockManager>,
    // Serializes the check-then-insert of create()
    create_lock: parking_lot::Mutex<()>,
}

impl AccountStore {
    pub(crate) fn new(storage: Arc<Storage>, locks: Arc<LockManager>) -> Self {
        Self {
            storage,
            locks,
            create_lock: parking_lot::Mutex::new(()),
        }
    }

    /// Create a new account with balance 0 and version 0
    ///
    /// Fails `DuplicateAccount` if an account already exists for this
    /// (owner, currency).
    pub fn create(&self, owner: &str, currency: Currency) -> Result<Account> {
        let _serialized = self.create_lock.lock();

        if self.storage.find_account_by_owner(owner, currency)?.is_some() {
            return Err(Error::DuplicateAccount {
                owner: owner.to_string(),
                currency,
            });
        }

        let now = Utc::now();
        let account = Account {
            id: Uuid::now_v7(),
            owner: owner.to_string(),
            currency,
            balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.storage.insert_account(&account)?;

        tracing::info!(account_id = %account.id, owner, %currency, "Account opened");

        Ok(account)
    }

    /// Get an account without locking
    ///
    /// Used for plain balance reads; may observe state slightly behind an
    /// in-flight commit.
    pub fn get(&self, id: Uuid) -> Result<Account> {
        self.storage
            .get_account(id)?
            .ok_or(Error::AccountNotFound(id))
    }

    /// Lock an account row into the unit of work, then read it
    ///
    /// The exclusive lock is held until the unit of work commits or
    /// aborts. The row is read after acquisition, so the caller sees the
    /// latest committed state.
    pub async fn get_for_update(&self, id: Uuid, uow: &mut UnitOfWork<'_>) -> Result<Account> {
        let guard = self.locks.acquire(id).await?;

        match self.storage.get_account(id)? {
            Some(account) => {
                uow.hold(guard);
                Ok(account)
            }
            // Guard drops here; no point pinning a row that does not exist
            None => Err(Error::AccountNotFound(id)),
        }
    }

    /// Lock two account rows in canonical order, then read both
    ///
    /// Acquisition order is ascending by identifier regardless of the
    /// argument order; the returned accounts match the argument order.
    pub async fn get_pair_for_update(
        &self,
        first: Uuid,
        second: Uuid,
        uow: &mut UnitOfWork<'_>,
    ) -> Result<(Account, Account)> {
        let (guard_a, guard_b) = self.locks.acquire_pair(first, second).await?;

        let first_account = self.storage.get_account(first)?;
        let second_account = self.storage.get_account(second)?;

        match (first_account, second_account) {
            (Some(a), Some(b)) => {
                uow.hold(guard_a);
                uow.hold(guard_b);
                Ok((a, b))
            }
            (None, _) => Err(Error::AccountNotFound(first)),
            (_, None) => Err(Error::AccountNotFound(second)),
        }
    }

    /// Stage a version-checked balance write into the unit of work
    ///
    /// The write is staged only if the stored version equals
    /// `expected_version`; otherwise `VersionConflict`. This is a second,
    /// independent guard beneath the row lock: the lock enforces
    /// single-writer-at-a-time, the version check protects any path that
    /// might mutate without it. The nonnegative-balance invariant is also
    /// re-checked here, independent of the engine's own validation.
    pub fn update_balance(
        &self,
        uow: &mut UnitOfWork<'_>,
        id: Uuid,
        new_balance: Decimal,
        expected_version: u64,
    ) -> Result<Account> {
        let current = self.get(id)?;

        if current.version != expected_version {
            return Err(Error::VersionConflict {
                account_id: id,
                expected: expected_version,
                found: current.version,
            });
        }

        if new_balance < Decimal::ZERO {
            return Err(Error::InsufficientFunds {
                account_id: id,
                balance: current.balance,
                requested: current.balance - new_balance,
            });
        }

        let updated = Account {
            balance: new_balance,
            version: expected_version + 1,
            updated_at: Utc::now(),
            ..current
        };

        uow.stage_account(&updated)?;

        Ok(updated)
    }
}
