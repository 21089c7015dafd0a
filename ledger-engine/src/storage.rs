//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account rows (key: account id)
//! - `transactions` - Append-only transaction log (key: transaction id)
//! - `indices` - Secondary indices: (owner, currency) uniqueness and
//!   per-account history ordering
//! - `idempotency` - Request deduplication records (key: key hash)
//!
//! The history index key is `account_id || created_at_nanos_be || txn_id`,
//! so plain key order is creation-time order and a reverse scan yields
//! newest-first pages.

use crate::{
    error::{Error, Result},
    locks::AccountGuard,
    types::{Account, Currency, IdempotencyRecord, Transaction},
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_TRANSACTIONS: &str = "transactions";
const CF_INDICES: &str = "indices";
const CF_IDEMPOTENCY: &str = "idempotency";

/// Length of a history index key
const HISTORY_KEY_LEN: usize = 16 + 8 + 16;

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_level_zero_file_num_compaction_trigger(
            config.rocksdb.level0_file_num_compaction_trigger,
        );

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_accounts()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_transactions()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Self::cf_options_idempotency()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "Opened RocksDB");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_accounts() -> Options {
        let mut opts = Options::default();
        // Hot rows, read on every operation
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_idempotency() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Key encoding

    fn owner_index_key(owner: &str, currency: Currency) -> Vec<u8> {
        let mut key = owner.as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(currency.code().as_bytes());
        key
    }

    fn history_index_key(
        account_id: Uuid,
        created_at: DateTime<Utc>,
        txn_id: Uuid,
    ) -> [u8; HISTORY_KEY_LEN] {
        let mut key = [0u8; HISTORY_KEY_LEN];
        key[..16].copy_from_slice(account_id.as_bytes());
        let nanos = created_at.timestamp_nanos_opt().unwrap_or(0);
        key[16..24].copy_from_slice(&nanos.to_be_bytes());
        key[24..].copy_from_slice(txn_id.as_bytes());
        key
    }

    // Account operations

    /// Get account by ID, `None` if absent
    pub fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;

        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Look up the account registered for (owner, currency)
    pub fn find_account_by_owner(&self, owner: &str, currency: Currency) -> Result<Option<Uuid>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::owner_index_key(owner, currency);

        match self.db.get_cf(cf, &key)? {
            Some(value) => {
                let bytes: [u8; 16] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("corrupt owner index entry".to_string()))?;
                Ok(Some(Uuid::from_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Insert a new account row and its (owner, currency) index entry atomically
    ///
    /// The caller is responsible for the uniqueness check; this writes
    /// unconditionally.
    pub fn insert_account(&self, account: &Account) -> Result<()> {
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_accounts, account.id.as_bytes(), bincode::serialize(account)?);
        batch.put_cf(
            cf_indices,
            Self::owner_index_key(&account.owner, account.currency),
            account.id.as_bytes(),
        );
        self.db.write(batch)?;

        tracing::debug!(account_id = %account.id, owner = %account.owner, "Account row inserted");

        Ok(())
    }

    // Transaction operations

    /// Get transaction row by ID, `None` if absent
    pub fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;

        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Count transaction rows for an account
    pub fn account_history_count(&self, account_id: Uuid) -> Result<u64> {
        let cf = self.cf_handle(CF_INDICES)?;

        let mut start = [0u8; HISTORY_KEY_LEN];
        start[..16].copy_from_slice(account_id.as_bytes());

        let mut count = 0u64;
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(account_id.as_bytes()) {
                break;
            }
            count += 1;
        }

        Ok(count)
    }

    /// Fetch one history page for an account, newest first
    pub fn account_history_page(
        &self,
        account_id: Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transaction>> {
        let cf = self.cf_handle(CF_INDICES)?;

        // Seek past every possible timestamp for this account, then walk
        // backwards: key order is creation-time order.
        let mut seek = [0xFFu8; HISTORY_KEY_LEN];
        seek[..16].copy_from_slice(account_id.as_bytes());

        let mut skipped = 0u64;
        let mut page = Vec::new();

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&seek, Direction::Reverse))
        {
            let (key, _) = item?;
            if !key.starts_with(account_id.as_bytes()) {
                break;
            }
            if key.len() != HISTORY_KEY_LEN {
                return Err(Error::Storage("corrupt history index key".to_string()));
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            if page.len() as u64 >= limit {
                break;
            }

            let txn_id_bytes: [u8; 16] = key[24..]
                .try_into()
                .map_err(|_| Error::Storage("corrupt history index key".to_string()))?;
            let txn_id = Uuid::from_bytes(txn_id_bytes);
            let txn = self
                .get_transaction(txn_id)?
                .ok_or_else(|| Error::Storage(format!("dangling history index entry {}", txn_id)))?;
            page.push(txn);
        }

        Ok(page)
    }

    // Idempotency operations

    /// Get idempotency record by key hash, `None` if absent
    pub fn get_idempotency(&self, key_hash: &str) -> Result<Option<IdempotencyRecord>> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;

        match self.db.get_cf(cf, key_hash.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Write an idempotency record
    pub fn put_idempotency(&self, record: &IdempotencyRecord) -> Result<()> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        self.db
            .put_cf(cf, record.key_hash.as_bytes(), bincode::serialize(record)?)?;
        Ok(())
    }

    /// Delete an idempotency record (expiry cleanup)
    pub fn delete_idempotency(&self, key_hash: &str) -> Result<()> {
        let cf = self.cf_handle(CF_IDEMPOTENCY)?;
        self.db.delete_cf(cf, key_hash.as_bytes())?;
        Ok(())
    }

    // Statistics

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;

        Ok(StorageStats {
            total_accounts: self.approximate_count(cf_accounts)?,
            total_transactions: self.approximate_count(cf_transactions)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate number of account rows
    pub total_accounts: u64,
    /// Approximate number of transaction rows
    pub total_transactions: u64,
}

/// One mutating ledger operation's staging area
///
/// Owns the pending `WriteBatch` and the account locks held for the
/// operation. `commit` performs the single atomic write; dropping without
/// commit aborts, releasing the locks with no visible effect.
pub struct UnitOfWork<'a> {
    storage: &'a Storage,
    batch: WriteBatch,
    guards: Vec<AccountGuard>,
}

impl std::fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("staged_writes", &self.batch.len())
            .field("locks_held", &self.guards.len())
            .finish()
    }
}

impl<'a> UnitOfWork<'a> {
    /// Begin a unit of work against the given storage
    pub fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            batch: WriteBatch::default(),
            guards: Vec::new(),
        }
    }

    /// Take ownership of an acquired account lock for the remainder of
    /// the unit of work
    pub fn hold(&mut self, guard: AccountGuard) {
        self.guards.push(guard);
    }

    /// Stage an account row write
    pub fn stage_account(&mut self, account: &Account) -> Result<()> {
        let cf = self.storage.cf_handle(CF_ACCOUNTS)?;
        self.batch
            .put_cf(cf, account.id.as_bytes(), bincode::serialize(account)?);
        Ok(())
    }

    /// Stage a transaction row append together with its history index entry
    pub fn stage_transaction(&mut self, txn: &Transaction) -> Result<()> {
        let cf_transactions = self.storage.cf_handle(CF_TRANSACTIONS)?;
        let cf_indices = self.storage.cf_handle(CF_INDICES)?;

        self.batch
            .put_cf(cf_transactions, txn.id.as_bytes(), bincode::serialize(txn)?);
        self.batch.put_cf(
            cf_indices,
            Storage::history_index_key(txn.account_id, txn.created_at, txn.id),
            [],
        );
        Ok(())
    }

    /// Commit every staged write atomically, then release the held locks
    pub fn commit(self) -> Result<()> {
        let UnitOfWork {
            storage,
            batch,
            guards,
        } = self;

        let staged = batch.len();
        storage.db.write(batch)?;
        drop(guards);

        tracing::debug!(staged_writes = staged, "Unit of work committed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionKind;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_account(owner: &str) -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::now_v7(),
            owner: owner.to_string(),
            currency: Currency::USD,
            balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_transaction(account_id: Uuid, amount: Decimal) -> Transaction {
        Transaction {
            id: Uuid::now_v7(),
            account_id,
            kind: TransactionKind::Deposit,
            amount,
            balance_after: amount,
            related_id: None,
            description: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        assert!(storage.db.cf_handle(CF_ACCOUNTS).is_some());
        assert!(storage.db.cf_handle(CF_TRANSACTIONS).is_some());
        assert!(storage.db.cf_handle(CF_INDICES).is_some());
        assert!(storage.db.cf_handle(CF_IDEMPOTENCY).is_some());
    }

    #[test]
    fn test_insert_and_get_account() {
        let (storage, _temp) = test_storage();
        let account = test_account("alice");

        storage.insert_account(&account).unwrap();

        let retrieved = storage.get_account(account.id).unwrap().unwrap();
        assert_eq!(retrieved, account);

        let found = storage
            .find_account_by_owner("alice", Currency::USD)
            .unwrap();
        assert_eq!(found, Some(account.id));

        assert!(storage
            .find_account_by_owner("alice", Currency::INR)
            .unwrap()
            .is_none());
        assert!(storage.get_account(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_unit_of_work_commit() {
        let (storage, _temp) = test_storage();
        let account = test_account("bob");
        let txn = test_transaction(account.id, Decimal::new(100, 0));

        let mut uow = UnitOfWork::new(&storage);
        uow.stage_account(&account).unwrap();
        uow.stage_transaction(&txn).unwrap();
        uow.commit().unwrap();

        assert!(storage.get_account(account.id).unwrap().is_some());
        assert_eq!(storage.get_transaction(txn.id).unwrap().unwrap(), txn);
        assert_eq!(storage.account_history_count(account.id).unwrap(), 1);
    }

    #[test]
    fn test_unit_of_work_abort_leaves_no_trace() {
        let (storage, _temp) = test_storage();
        let account = test_account("carol");
        let txn = test_transaction(account.id, Decimal::new(50, 0));

        {
            let mut uow = UnitOfWork::new(&storage);
            uow.stage_account(&account).unwrap();
            uow.stage_transaction(&txn).unwrap();
            // Dropped without commit
        }

        assert!(storage.get_account(account.id).unwrap().is_none());
        assert!(storage.get_transaction(txn.id).unwrap().is_none());
        assert_eq!(storage.account_history_count(account.id).unwrap(), 0);
    }

    #[test]
    fn test_history_page_newest_first() {
        let (storage, _temp) = test_storage();
        let account = test_account("dave");
        storage.insert_account(&account).unwrap();

        let mut ids = Vec::new();
        for i in 1..=5 {
            let mut txn = test_transaction(account.id, Decimal::new(i, 0));
            // Spread creation times so ordering is unambiguous
            txn.created_at = Utc::now() + chrono::Duration::milliseconds(i);
            let mut uow = UnitOfWork::new(&storage);
            uow.stage_transaction(&txn).unwrap();
            uow.commit().unwrap();
            ids.push(txn.id);
        }

        assert_eq!(storage.account_history_count(account.id).unwrap(), 5);

        let page = storage.account_history_page(account.id, 0, 3).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].id, ids[4]);
        assert_eq!(page[1].id, ids[3]);
        assert_eq!(page[2].id, ids[2]);

        let rest = storage.account_history_page(account.id, 3, 3).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].id, ids[1]);
        assert_eq!(rest[1].id, ids[0]);
    }

    #[test]
    fn test_history_scan_stays_within_account() {
        let (storage, _temp) = test_storage();
        let first = test_account("erin");
        let second = test_account("frank");

        for account in [&first, &second] {
            storage.insert_account(account).unwrap();
            let txn = test_transaction(account.id, Decimal::new(10, 0));
            let mut uow = UnitOfWork::new(&storage);
            uow.stage_transaction(&txn).unwrap();
            uow.commit().unwrap();
        }

        assert_eq!(storage.account_history_count(first.id).unwrap(), 1);
        assert_eq!(storage.account_history_count(second.id).unwrap(), 1);

        let page = storage.account_history_page(first.id, 0, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].account_id, first.id);
    }

    #[test]
    fn test_idempotency_roundtrip() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let record = IdempotencyRecord {
            key_hash: "deadbeef".to_string(),
            method: "POST".to_string(),
            path: "/transfers".to_string(),
            status: 201,
            body: r#"{"id":"1"}"#.to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
        };

        assert!(storage.get_idempotency("deadbeef").unwrap().is_none());
        storage.put_idempotency(&record).unwrap();
        assert_eq!(storage.get_idempotency("deadbeef").unwrap().unwrap(), record);

        storage.delete_idempotency("deadbeef").unwrap();
        assert!(storage.get_idempotency("deadbeef").unwrap().is_none());
    }
}
