//! BankRail Ledger Engine
//!
//! Balance-mutating ledger with an immutable transaction log, built for
//! concurrent access.
//!
//! # Architecture
//!
//! - **Per-account locking**: exclusive in-process row locks serialize
//!   writers on the same account while disjoint accounts run in parallel
//! - **Unit of work**: every mutation stages into one RocksDB `WriteBatch`
//!   and commits atomically, or aborts leaving no trace
//! - **Optimistic versioning**: a version check at write time backs the
//!   row lock as defense-in-depth
//! - **Double-entry transfers**: one debit and one credit row, linked,
//!   committed as a single indivisible batch
//!
//! # Invariants
//!
//! - Balances never go negative
//! - Account versions strictly increase on every successful mutation
//! - Conservation: a transfer moves value, it never creates or destroys it
//! - Transaction rows are append-only, never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod accounts;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use accounts::AccountStore;
pub use config::Config;
pub use error::{Error, Result};
pub use idempotency::IdempotencyStore;
pub use ledger::Ledger;
pub use types::{
    Account, Currency, History, IdempotencyRecord, Transaction, TransactionKind, Transfer,
};
