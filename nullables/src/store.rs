//! Nullable store — thread-safe in-memory chain storage for testing.

use dsync_store::{
    Account, AccountStore, BatchOp, BatchWriter, BlockStore, CodeStore, MetaStore, StorageStore,
    StoreError, WriteBatch,
};
use dsync_types::{Address, BlockHash, Hash256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<Address, Account>,
    storage: BTreeMap<Address, BTreeMap<Hash256, Hash256>>,
    codes: HashMap<Hash256, Vec<u8>>,
    blocks: HashMap<BlockHash, Vec<u8>>,
    canonical: BTreeMap<u64, BlockHash>,
    meta: HashMap<String, Vec<u8>>,
}

/// An in-memory chain store for testing.
///
/// All tables sit behind one mutex so a [`WriteBatch`] is applied
/// atomically. Write failures can be injected with
/// [`NullStore::set_fail_writes`] to exercise error propagation.
pub struct NullStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
    batches_written: AtomicU64,
}

impl NullStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            fail_writes: AtomicBool::new(false),
            batches_written: AtomicU64::new(0),
        }
    }

    /// Make every subsequent `write_batch` fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of batches committed so far.
    pub fn batches_written(&self) -> u64 {
        self.batches_written.load(Ordering::SeqCst)
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore for NullStore {
    fn get_account(&self, address: &Address) -> Result<Option<Account>, StoreError> {
        Ok(self.tables.lock().unwrap().accounts.get(address).copied())
    }

    fn iter_accounts(&self) -> Result<Vec<(Address, Account)>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .accounts
            .iter()
            .map(|(a, acc)| (*a, *acc))
            .collect())
    }
}

impl StorageStore for NullStore {
    fn get_storage(&self, address: &Address, key: &Hash256) -> Result<Hash256, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .storage
            .get(address)
            .and_then(|slots| slots.get(key))
            .copied()
            .unwrap_or(Hash256::ZERO))
    }

    fn iter_storage(&self, address: &Address) -> Result<Vec<(Hash256, Hash256)>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .storage
            .get(address)
            .map(|slots| slots.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default())
    }
}

impl CodeStore for NullStore {
    fn get_code(&self, code_hash: &Hash256) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tables.lock().unwrap().codes.get(code_hash).cloned())
    }
}

impl BlockStore for NullStore {
    fn get_block(&self, hash: &BlockHash) -> Result<Vec<u8>, StoreError> {
        self.tables
            .lock()
            .unwrap()
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{:?}", hash)))
    }

    fn exists(&self, hash: &BlockHash) -> Result<bool, StoreError> {
        Ok(self.tables.lock().unwrap().blocks.contains_key(hash))
    }

    fn get_canonical_hash(&self, number: u64) -> Result<Option<BlockHash>, StoreError> {
        Ok(self.tables.lock().unwrap().canonical.get(&number).copied())
    }

    fn block_count(&self) -> Result<u64, StoreError> {
        Ok(self.tables.lock().unwrap().blocks.len() as u64)
    }
}

impl MetaStore for NullStore {
    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tables.lock().unwrap().meta.get(key).cloned())
    }
}

impl BatchWriter for NullStore {
    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        let mut tables = self.tables.lock().unwrap();
        for op in batch.into_ops() {
            match op {
                BatchOp::PutAccount { address, account } => {
                    tables.accounts.insert(address, account);
                }
                BatchOp::DeleteAccount { address } => {
                    tables.accounts.remove(&address);
                }
                BatchOp::PutStorage {
                    address,
                    key,
                    value,
                } => {
                    if value.is_zero() {
                        if let Some(slots) = tables.storage.get_mut(&address) {
                            slots.remove(&key);
                            if slots.is_empty() {
                                tables.storage.remove(&address);
                            }
                        }
                    } else {
                        tables.storage.entry(address).or_default().insert(key, value);
                    }
                }
                BatchOp::ClearStorage { address } => {
                    tables.storage.remove(&address);
                }
                BatchOp::PutCode { code_hash, code } => {
                    tables.codes.insert(code_hash, code);
                }
                BatchOp::PutBlock { hash, bytes } => {
                    tables.blocks.insert(hash, bytes);
                }
                BatchOp::PutCanonical { number, hash } => {
                    tables.canonical.insert(number, hash);
                }
                BatchOp::PutMeta { key, value } => {
                    tables.meta.insert(key, value);
                }
            }
        }
        self.batches_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
