//! Metrics collection for observability
//!
//! Prometheus collectors for the ledger engine:
//!
//! - `ledger_deposits_total` / `ledger_withdrawals_total` /
//!   `ledger_transfers_total` - committed operations
//! - `ledger_insufficient_funds_total` - rejected debits
//! - `ledger_version_conflicts_total` - optimistic-check failures
//! - `ledger_lock_timeouts_total` - bounded lock waits that expired
//! - `ledger_commit_duration_seconds` - unit-of-work commit latency
//!
//! Collectors register on an instance-scoped registry so multiple engines
//! can coexist in one process; the boundary layer owns the scrape
//! endpoint.

use crate::error::Error;
use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed deposits
    pub deposits_total: IntCounter,

    /// Committed withdrawals
    pub withdrawals_total: IntCounter,

    /// Committed transfers
    pub transfers_total: IntCounter,

    /// Operations rejected for insufficient funds
    pub insufficient_funds_total: IntCounter,

    /// Version checks that found a stale version
    pub version_conflicts_total: IntCounter,

    /// Lock acquisitions that timed out
    pub lock_timeouts_total: IntCounter,

    /// Commit latency histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let deposits_total =
            IntCounter::new("ledger_deposits_total", "Committed deposits")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let withdrawals_total =
            IntCounter::new("ledger_withdrawals_total", "Committed withdrawals")?;
        registry.register(Box::new(withdrawals_total.clone()))?;

        let transfers_total =
            IntCounter::new("ledger_transfers_total", "Committed transfers")?;
        registry.register(Box::new(transfers_total.clone()))?;

        let insufficient_funds_total = IntCounter::new(
            "ledger_insufficient_funds_total",
            "Operations rejected for insufficient funds",
        )?;
        registry.register(Box::new(insufficient_funds_total.clone()))?;

        let version_conflicts_total = IntCounter::new(
            "ledger_version_conflicts_total",
            "Version checks that found a stale version",
        )?;
        registry.register(Box::new(version_conflicts_total.clone()))?;

        let lock_timeouts_total = IntCounter::new(
            "ledger_lock_timeouts_total",
            "Lock acquisitions that timed out",
        )?;
        registry.register(Box::new(lock_timeouts_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_commit_duration_seconds",
                "Unit-of-work commit latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            deposits_total,
            withdrawals_total,
            transfers_total,
            insufficient_funds_total,
            version_conflicts_total,
            lock_timeouts_total,
            commit_duration,
            registry,
        })
    }

    /// Record a rejected operation by error kind
    pub(crate) fn record_rejection(&self, err: &Error) {
        match err {
            Error::InsufficientFunds { .. } => self.insufficient_funds_total.inc(),
            Error::VersionConflict { .. } => self.version_conflicts_total.inc(),
            Error::LockTimeout(_) => self.lock_timeouts_total.inc(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    #[test]
    fn test_metrics_are_instance_scoped() {
        // Two collectors must coexist without registration clashes
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.deposits_total.inc();
        assert_eq!(first.deposits_total.get(), 1);
        assert_eq!(second.deposits_total.get(), 0);
    }

    #[test]
    fn test_record_rejection_buckets_by_kind() {
        let metrics = Metrics::new().unwrap();

        metrics.record_rejection(&Error::InsufficientFunds {
            account_id: Uuid::new_v4(),
            balance: Decimal::ZERO,
            requested: Decimal::ONE,
        });
        metrics.record_rejection(&Error::LockTimeout(Uuid::new_v4()));
        metrics.record_rejection(&Error::SameAccount);

        assert_eq!(metrics.insufficient_funds_total.get(), 1);
        assert_eq!(metrics.lock_timeouts_total.get(), 1);
        assert_eq!(metrics.version_conflicts_total.get(), 0);
    }
}
