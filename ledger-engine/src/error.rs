//! Error types for the ledger

use crate::types::Currency;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Domain errors are matched structurally by the boundary layer, never by
/// message text. Any error returned from a mutating operation aborts the
/// enclosing unit of work: no staged write is ever visible.
#[derive(Error, Debug)]
pub enum Error {
    /// No account with the given ID
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    /// An account already exists for this (owner, currency)
    #[error("Account already exists for owner {owner} in {currency}")]
    DuplicateAccount {
        /// Requested owner
        owner: String,
        /// Requested currency
        currency: Currency,
    },

    /// The operation would drive the balance negative
    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Account that lacked funds
        account_id: Uuid,
        /// Balance at validation time
        balance: Decimal,
        /// Amount the operation tried to remove
        requested: Decimal,
    },

    /// Transfer endpoints hold different currencies
    #[error("Currency mismatch: source is {from}, destination is {to}")]
    CurrencyMismatch {
        /// Source account currency
        from: Currency,
        /// Destination account currency
        to: Currency,
    },

    /// Transfer source and destination are the same account
    #[error("Transfer source and destination must differ")]
    SameAccount,

    /// Stored version did not match the expected version (transient, retryable)
    #[error("Version conflict on account {account_id}: expected {expected}, found {found}")]
    VersionConflict {
        /// Account whose version diverged
        account_id: Uuid,
        /// Version the writer expected
        expected: u64,
        /// Version actually stored
        found: u64,
    },

    /// Lock wait exceeded the configured timeout (transient, retryable)
    #[error("Timed out waiting for lock on account {0}")]
    LockTimeout(Uuid),

    /// Amount was zero or negative
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    /// Page or limit outside the accepted range
    #[error("Invalid pagination: page {page}, limit {limit}")]
    InvalidPagination {
        /// Requested page (must be >= 1)
        page: u32,
        /// Requested limit (must be in 1..=100)
        limit: u32,
    },

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller may safely retry the operation
    ///
    /// Only transient serialization failures are retryable; every other
    /// kind is terminal for the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::VersionConflict { .. } | Error::LockTimeout(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let conflict = Error::VersionConflict {
            account_id: Uuid::new_v4(),
            expected: 3,
            found: 4,
        };
        assert!(conflict.is_retryable());
        assert!(Error::LockTimeout(Uuid::new_v4()).is_retryable());

        assert!(!Error::SameAccount.is_retryable());
        assert!(!Error::AccountNotFound(Uuid::new_v4()).is_retryable());
        assert!(!Error::InsufficientFunds {
            account_id: Uuid::new_v4(),
            balance: Decimal::ZERO,
            requested: Decimal::ONE,
        }
        .is_retryable());
    }
}
