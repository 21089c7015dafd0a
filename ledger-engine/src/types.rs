//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Time-ordered identifiers (UUIDv7)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Indian Rupee
    INR,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::INR => "INR",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USD" => Some(Currency::USD),
            "INR" => Some(Currency::INR),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Account row
///
/// Unique per (owner, currency). The balance is mutated only through the
/// account store's version-checked update; the version strictly increases
/// on every successful balance mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Owner identifier, as provided by the boundary layer
    pub owner: String,

    /// Account currency
    pub currency: Currency,

    /// Current balance, never negative
    pub balance: Decimal,

    /// Monotonic version, incremented on every balance mutation
    pub version: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

/// Transaction kind (ledger entry type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionKind {
    /// Funds added to an account
    Deposit = 1,
    /// Funds removed from an account
    Withdrawal = 2,
    /// Source side of a transfer
    TransferDebit = 3,
    /// Destination side of a transfer
    TransferCredit = 4,
}

impl TransactionKind {
    /// Stable name for logs and boundary serialization
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdrawal => "WITHDRAWAL",
            TransactionKind::TransferDebit => "TRANSFER_DEBIT",
            TransactionKind::TransferCredit => "TRANSFER_CREDIT",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable transaction row
///
/// Append-only: once committed a row is never modified or deleted. The
/// two rows of a transfer reference each other through `related_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID (UUIDv7)
    pub id: Uuid,

    /// Account this row belongs to
    pub account_id: Uuid,

    /// Entry kind
    pub kind: TransactionKind,

    /// Amount moved, always positive
    pub amount: Decimal,

    /// Account balance immediately after this entry, never negative
    pub balance_after: Decimal,

    /// The paired row of a transfer, absent for simple entries
    pub related_id: Option<Uuid>,

    /// Free-form description from the caller
    pub description: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// The two linked rows produced by a committed transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    /// Row on the source account
    pub debit: Transaction,
    /// Row on the destination account
    pub credit: Transaction,
}

/// One page of an account's transaction history, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// Rows on this page, ordered by creation time descending
    pub transactions: Vec<Transaction>,

    /// Exact total row count for the account
    pub total: u64,

    /// Requested page, 1-based
    pub page: u32,

    /// Requested page size
    pub limit: u32,

    /// Total page count at this page size
    pub total_pages: u64,
}

/// Cached result of a deduplicated request
///
/// Written once per distinct key hash (first writer wins), never updated,
/// treated as absent once expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Opaque key hash computed by the boundary layer
    pub key_hash: String,

    /// Originating method, opaque to the core
    pub method: String,

    /// Originating path, opaque to the core
    pub path: String,

    /// Cached result status
    pub status: u16,

    /// Cached result body, replayed byte-identically
    pub body: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Whether the record has expired at the given instant
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        at >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse("USD"), Some(Currency::USD));
        assert_eq!(Currency::parse("INR"), Some(Currency::INR));
        assert_eq!(Currency::parse("EUR"), None);
        assert_eq!(Currency::parse("usd"), None);
    }

    #[test]
    fn test_transaction_kind_names() {
        assert_eq!(TransactionKind::Deposit.as_str(), "DEPOSIT");
        assert_eq!(TransactionKind::TransferDebit.as_str(), "TRANSFER_DEBIT");
        assert_eq!(TransactionKind::TransferCredit.to_string(), "TRANSFER_CREDIT");
    }

    #[test]
    fn test_idempotency_record_expiry() {
        let now = Utc::now();
        let record = IdempotencyRecord {
            key_hash: "abc".to_string(),
            method: "POST".to_string(),
            path: "/transactions/deposit".to_string(),
            status: 201,
            body: "{}".to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(60),
        };

        assert!(!record.is_expired(now));
        assert!(!record.is_expired(now + Duration::seconds(59)));
        assert!(record.is_expired(now + Duration::seconds(60)));
        assert!(record.is_expired(now + Duration::seconds(61)));
    }
}
