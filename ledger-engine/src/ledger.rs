//! Main ledger orchestration layer
//!
//! This module ties storage, locking, and the account store together
//! into the engine that executes deposits, withdrawals, and transfers as
//! atomic units of work.
//!
//! # Example
//!
//! ```no_run
//! use ledger_engine::{Config, Currency, Ledger};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> ledger_engine::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!
//!     let account = ledger.open_account("alice", Currency::USD)?;
//!     ledger.deposit(account.id, Decimal::new(100, 0), None).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    accounts::AccountStore,
    error::{Error, Result},
    idempotency::IdempotencyStore,
    locks::LockManager,
    metrics::Metrics,
    storage::{Storage, UnitOfWork},
    types::{Account, Currency, History, Transaction, TransactionKind, Transfer},
    Config,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Largest accepted history page size
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Main ledger interface
///
/// Every mutating operation runs as one unit of work: lock the touched
/// account rows, validate, stage writes, commit atomically. Any failure
/// aborts the unit with no visible effect. Reads are non-locking and see
/// committed state only.
pub struct Ledger {
    /// Shared storage handle
    storage: Arc<Storage>,

    /// Account rows and their invariants
    accounts: AccountStore,

    /// Request deduplication cache (used by the boundary layer)
    idempotency: IdempotencyStore,

    /// Metrics collectors
    metrics: Metrics,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let locks = Arc::new(LockManager::new(Duration::from_millis(
            config.locking.wait_timeout_ms,
        )));
        let accounts = AccountStore::new(storage.clone(), locks);
        let idempotency = IdempotencyStore::new(
            storage.clone(),
            Duration::from_secs(config.idempotency.default_ttl_secs),
        );
        let metrics = Metrics::new()
            .map_err(|e| Error::Internal(format!("metrics registration failed: {}", e)))?;

        Ok(Self {
            storage,
            accounts,
            idempotency,
            metrics,
        })
    }

    /// The account store, for boundary layers that wire it directly
    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    /// The request deduplication cache
    pub fn idempotency(&self) -> &IdempotencyStore {
        &self.idempotency
    }

    /// The engine's metrics collectors
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Storage statistics, for startup logging and health reporting
    pub fn stats(&self) -> Result<crate::storage::StorageStats> {
        self.storage.stats()
    }

    /// Open a new account with balance 0
    pub fn open_account(&self, owner: &str, currency: Currency) -> Result<Account> {
        self.accounts.create(owner, currency)
    }

    /// Deposit funds into an account
    pub async fn deposit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Transaction> {
        let result = self
            .record_simple(account_id, TransactionKind::Deposit, amount, description)
            .await;
        match &result {
            Ok(_) => self.metrics.deposits_total.inc(),
            Err(err) => self.metrics.record_rejection(err),
        }
        result
    }

    /// Withdraw funds from an account
    ///
    /// Fails `InsufficientFunds` if the balance would go negative.
    pub async fn withdraw(
        &self,
        account_id: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Transaction> {
        let result = self
            .record_simple(account_id, TransactionKind::Withdrawal, amount, description)
            .await;
        match &result {
            Ok(_) => self.metrics.withdrawals_total.inc(),
            Err(err) => self.metrics.record_rejection(err),
        }
        result
    }

    /// Record a single-account entry as one unit of work
    async fn record_simple(
        &self,
        account_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let mut uow = UnitOfWork::new(&self.storage);

        let account = self.accounts.get_for_update(account_id, &mut uow).await?;

        let new_balance = match kind {
            TransactionKind::Deposit => account.balance + amount,
            TransactionKind::Withdrawal => {
                let remaining = account.balance - amount;
                if remaining < Decimal::ZERO {
                    return Err(Error::InsufficientFunds {
                        account_id,
                        balance: account.balance,
                        requested: amount,
                    });
                }
                remaining
            }
            TransactionKind::TransferDebit | TransactionKind::TransferCredit => {
                return Err(Error::Internal(
                    "transfer entries are recorded by transfer()".to_string(),
                ));
            }
        };

        let updated =
            self.accounts
                .update_balance(&mut uow, account_id, new_balance, account.version)?;

        let txn = Transaction {
            id: Uuid::now_v7(),
            account_id,
            kind,
            amount,
            balance_after: updated.balance,
            related_id: None,
            description,
            created_at: Utc::now(),
        };
        uow.stage_transaction(&txn)?;

        let started = Instant::now();
        uow.commit()?;
        self.metrics
            .commit_duration
            .observe(started.elapsed().as_secs_f64());

        tracing::info!(
            %account_id,
            kind = %kind,
            amount = %amount,
            balance_after = %txn.balance_after,
            "Entry committed"
        );

        Ok(txn)
    }

    /// Move funds between two accounts of the same currency
    ///
    /// Produces one debit row on the source and one credit row on the
    /// destination, linked through `related_id`, committed as a single
    /// indivisible unit. Locks are taken in canonical ascending-identifier
    /// order independent of direction, so opposed concurrent transfers on
    /// one pair cannot deadlock.
    pub async fn transfer(
        &self,
        from: Uuid,
        to: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Transfer> {
        let result = self.transfer_inner(from, to, amount, description).await;
        match &result {
            Ok(_) => self.metrics.transfers_total.inc(),
            Err(err) => self.metrics.record_rejection(err),
        }
        result
    }

    async fn transfer_inner(
        &self,
        from: Uuid,
        to: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Transfer> {
        if from == to {
            return Err(Error::SameAccount);
        }
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let mut uow = UnitOfWork::new(&self.storage);

        let (source, destination) = self.accounts.get_pair_for_update(from, to, &mut uow).await?;

        if source.currency != destination.currency {
            return Err(Error::CurrencyMismatch {
                from: source.currency,
                to: destination.currency,
            });
        }

        let remaining = source.balance - amount;
        if remaining < Decimal::ZERO {
            return Err(Error::InsufficientFunds {
                account_id: from,
                balance: source.balance,
                requested: amount,
            });
        }

        let debited = self
            .accounts
            .update_balance(&mut uow, from, remaining, source.version)?;
        let credited = self.accounts.update_balance(
            &mut uow,
            to,
            destination.balance + amount,
            destination.version,
        )?;

        // Both rows of the double entry are minted up front so each can
        // reference the other.
        let debit_id = Uuid::now_v7();
        let credit_id = Uuid::now_v7();
        let now = Utc::now();

        let debit = Transaction {
            id: debit_id,
            account_id: from,
            kind: TransactionKind::TransferDebit,
            amount,
            balance_after: debited.balance,
            related_id: Some(credit_id),
            description: description.clone(),
            created_at: now,
        };
        let credit = Transaction {
            id: credit_id,
            account_id: to,
            kind: TransactionKind::TransferCredit,
            amount,
            balance_after: credited.balance,
            related_id: Some(debit_id),
            description,
            created_at: now,
        };

        uow.stage_transaction(&debit)?;
        uow.stage_transaction(&credit)?;

        let started = Instant::now();
        uow.commit()?;
        self.metrics
            .commit_duration
            .observe(started.elapsed().as_secs_f64());

        tracing::info!(
            %from,
            %to,
            amount = %amount,
            "Transfer committed"
        );

        Ok(Transfer { debit, credit })
    }

    /// Current balance of an account (non-locking read)
    pub fn balance(&self, account_id: Uuid) -> Result<Decimal> {
        Ok(self.accounts.get(account_id)?.balance)
    }

    /// One page of an account's transaction history, newest first
    ///
    /// `page` is 1-based; `limit` must be in `1..=MAX_HISTORY_LIMIT`.
    pub fn history(&self, account_id: Uuid, page: u32, limit: u32) -> Result<History> {
        if page < 1 || limit < 1 || limit > MAX_HISTORY_LIMIT {
            return Err(Error::InvalidPagination { page, limit });
        }

        // Reject unknown accounts rather than returning an empty page
        self.accounts.get(account_id)?;

        let total = self.storage.account_history_count(account_id)?;
        let offset = u64::from(page - 1) * u64::from(limit);
        let transactions = self
            .storage
            .account_history_page(account_id, offset, u64::from(limit))?;
        let total_pages = total.div_ceil(u64::from(limit));

        Ok(History {
            transactions,
            total,
            page,
            limit,
            total_pages,
        })
    }
}
