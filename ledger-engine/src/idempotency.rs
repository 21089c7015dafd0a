//! Request deduplication cache
//!
//! Keyed by an opaque hash supplied by the boundary layer. Records are
//! written once (first writer wins), never updated, and treated as absent
//! once expired. The store is deliberately independent of the ledger's
//! units of work: storing a record never undoes or blocks the mutation it
//! caches, and insert races converge on a single cached result.

use crate::{
    error::Result,
    storage::Storage,
    types::IdempotencyRecord,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Cached response for a replayed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// Result status recorded by the boundary layer
    pub status: u16,
    /// Result body, byte-identical on every replay
    pub body: String,
}

/// Deduplication cache for client requests
#[derive(Debug)]
pub struct IdempotencyStore {
    storage: Arc<Storage>,
    // In-process analogue of a uniqueness constraint: serializes the
    // check-then-insert so concurrent writers of one hash cannot both win
    insert_lock: parking_lot::Mutex<()>,
    default_ttl: Duration,
}

impl IdempotencyStore {
    pub(crate) fn new(storage: Arc<Storage>, default_ttl: Duration) -> Self {
        Self {
            storage,
            insert_lock: parking_lot::Mutex::new(()),
            default_ttl,
        }
    }

    /// Default record lifetime from configuration
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Hash a client idempotency key with its originating route
    ///
    /// Boundary helper: the core itself only ever sees the digest.
    pub fn key_hash(method: &str, path: &str, key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b"\0");
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
        hasher.update(key.as_bytes());

        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(out, "{:02x}", byte);
        }
        out
    }

    /// Look up the cached response for a key hash
    ///
    /// Expired and missing records are indistinguishable; an expired
    /// record is deleted on the way out.
    pub fn lookup(&self, key_hash: &str) -> Result<Option<CachedResponse>> {
        match self.storage.get_idempotency(key_hash)? {
            Some(record) if record.is_expired(Utc::now()) => {
                self.storage.delete_idempotency(key_hash)?;
                tracing::debug!(key_hash, "Expired idempotency record dropped");
                Ok(None)
            }
            Some(record) => Ok(Some(CachedResponse {
                status: record.status,
                body: record.body,
            })),
            None => Ok(None),
        }
    }

    /// Insert a record for a key hash unless one already exists
    ///
    /// First writer wins: a live record is never overwritten, so replays
    /// keep returning the original result. Returns whether this call
    /// inserted, letting a boundary log lost races without failing them.
    pub fn store(
        &self,
        key_hash: &str,
        method: &str,
        path: &str,
        status: u16,
        body: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let _serialized = self.insert_lock.lock();

        let now = Utc::now();
        if let Some(existing) = self.storage.get_idempotency(key_hash)? {
            if !existing.is_expired(now) {
                return Ok(false);
            }
        }

        // Out-of-range TTLs saturate instead of failing the insert
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
        let record = IdempotencyRecord {
            key_hash: key_hash.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            status,
            body: body.to_string(),
            created_at: now,
            expires_at,
        };

        self.storage.put_idempotency(&record)?;

        tracing::debug!(key_hash, status, "Idempotency record stored");

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use tempfile::TempDir;

    fn test_store() -> (IdempotencyStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        (
            IdempotencyStore::new(storage, Duration::from_secs(3600)),
            temp_dir,
        )
    }

    #[test]
    fn test_key_hash_is_stable_and_distinct() {
        let a = IdempotencyStore::key_hash("POST", "/transfers", "client-key-1");
        let b = IdempotencyStore::key_hash("POST", "/transfers", "client-key-1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        assert_ne!(a, IdempotencyStore::key_hash("POST", "/transfers", "client-key-2"));
        assert_ne!(a, IdempotencyStore::key_hash("POST", "/deposits", "client-key-1"));
        assert_ne!(a, IdempotencyStore::key_hash("PUT", "/transfers", "client-key-1"));
    }

    #[test]
    fn test_first_writer_wins() {
        let (store, _temp) = test_store();
        let hash = "a".repeat(64);
        let ttl = Duration::from_secs(60);

        assert!(store
            .store(&hash, "POST", "/transfers", 201, r#"{"id":"first"}"#, ttl)
            .unwrap());
        // The second writer loses and the original body survives
        assert!(!store
            .store(&hash, "POST", "/transfers", 201, r#"{"id":"second"}"#, ttl)
            .unwrap());

        let cached = store.lookup(&hash).unwrap().unwrap();
        assert_eq!(cached.status, 201);
        assert_eq!(cached.body, r#"{"id":"first"}"#);
    }

    #[test]
    fn test_replay_is_byte_identical() {
        let (store, _temp) = test_store();
        let hash = IdempotencyStore::key_hash("POST", "/transactions/deposit", "k-42");
        let body = r#"{"transaction_id":"0192d1c0-0000-7000-8000-000000000000","balance":"150.00"}"#;

        store
            .store(&hash, "POST", "/transactions/deposit", 201, body, Duration::from_secs(60))
            .unwrap();

        let first = store.lookup(&hash).unwrap().unwrap();
        let second = store.lookup(&hash).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.body, body);
    }

    #[test]
    fn test_expired_record_is_a_miss() {
        let (store, _temp) = test_store();
        let hash = "b".repeat(64);

        store
            .store(&hash, "POST", "/transfers", 201, "{}", Duration::ZERO)
            .unwrap();

        assert!(store.lookup(&hash).unwrap().is_none());

        // The slot is reusable once the old record expired
        assert!(store
            .store(&hash, "POST", "/transfers", 200, "{}", Duration::from_secs(60))
            .unwrap());
        assert!(store.lookup(&hash).unwrap().is_some());
    }

    #[test]
    fn test_lookup_miss() {
        let (store, _temp) = test_store();
        assert!(store.lookup("missing").unwrap().is_none());
    }
}
