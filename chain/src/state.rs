//! Write overlay over the committed state.
//!
//! Execution and diff application both mutate a [`StateDb`]; nothing reaches
//! the store until the overlay is turned into a [`WriteBatch`] and committed.

use std::collections::{BTreeMap, BTreeSet};

use dsync_crypto::{keccak256, keccak256_multi};
use dsync_store::{Account, ChainStore, StoreError, WriteBatch};
use dsync_types::{Address, BlockHash, Hash256};

use crate::block::Receipt;
use crate::diff_layer::{DiffAccount, DiffCode, DiffLayer, DiffStorage};

pub struct StateDb<'a> {
    store: &'a dyn ChainStore,
    /// `None` marks a deleted account.
    accounts: BTreeMap<Address, Option<Account>>,
    storage: BTreeMap<Address, BTreeMap<Hash256, Hash256>>,
    /// Accounts whose committed storage no longer applies.
    cleared: BTreeSet<Address>,
    destructs: BTreeSet<Address>,
    codes: BTreeMap<Hash256, Vec<u8>>,
}

impl<'a> StateDb<'a> {
    pub fn new(store: &'a dyn ChainStore) -> Self {
        Self {
            store,
            accounts: BTreeMap::new(),
            storage: BTreeMap::new(),
            cleared: BTreeSet::new(),
            destructs: BTreeSet::new(),
            codes: BTreeMap::new(),
        }
    }

    pub fn account(&self, address: &Address) -> Result<Option<Account>, StoreError> {
        match self.accounts.get(address) {
            Some(entry) => Ok(*entry),
            None => self.store.get_account(address),
        }
    }

    pub fn set_account(&mut self, address: Address, account: Account) {
        self.accounts.insert(address, Some(account));
    }

    pub fn storage(&self, address: &Address, key: &Hash256) -> Result<Hash256, StoreError> {
        if let Some(value) = self.storage.get(address).and_then(|slots| slots.get(key)) {
            return Ok(*value);
        }
        if self.cleared.contains(address) {
            return Ok(Hash256::ZERO);
        }
        self.store.get_storage(address, key)
    }

    pub fn set_storage(&mut self, address: Address, key: Hash256, value: Hash256) {
        self.storage.entry(address).or_default().insert(key, value);
    }

    /// Delete an account together with all of its storage.
    pub fn destruct(&mut self, address: Address) {
        self.accounts.insert(address, None);
        self.storage.remove(&address);
        self.cleared.insert(address);
        self.destructs.insert(address);
    }

    pub fn put_code(&mut self, hash: Hash256, code: Vec<u8>) {
        self.codes.insert(hash, code);
    }

    pub fn code(&self, hash: &Hash256) -> Result<Option<Vec<u8>>, StoreError> {
        match self.codes.get(hash) {
            Some(code) => Ok(Some(code.clone())),
            None => self.store.get_code(hash),
        }
    }

    /// Whether a live account in the overlay points at `hash`.
    fn code_is_referenced(&self, hash: &Hash256) -> bool {
        self.accounts
            .values()
            .flatten()
            .any(|account| account.code_hash == *hash)
    }

    /// Pending codes still referenced once the overlay is committed.
    /// Code deployed and then dropped within the same block is not kept.
    fn live_codes(&self) -> impl Iterator<Item = (&Hash256, &Vec<u8>)> {
        self.codes
            .iter()
            .filter(|(hash, _)| self.code_is_referenced(hash))
    }

    /// Find the first part of an applied `diff` that the state root does not
    /// commit to: storage of an address with no account, code nothing
    /// references, or a code hash with no code behind it.
    ///
    /// Call after [`StateDb::apply_diff`]. `Ok(None)` means every write in
    /// the diff is covered by the state root.
    pub fn find_unanchored(&self, diff: &DiffLayer) -> Result<Option<String>, StoreError> {
        for slot in &diff.storage {
            if self.account(&slot.address)?.is_none() {
                return Ok(Some(format!("storage for non-existent account {}", slot.address)));
            }
        }
        for code in &diff.codes {
            if !self.code_is_referenced(&code.hash) {
                return Ok(Some(format!("unreferenced code {}", code.hash)));
            }
        }
        for change in &diff.accounts {
            let Some(code_hash) = change.code_hash else {
                continue;
            };
            if code_hash.is_zero() {
                continue;
            }
            if self.code(&code_hash)?.is_none() {
                return Ok(Some(format!(
                    "account {} points at missing code {}",
                    change.address, code_hash
                )));
            }
        }
        Ok(None)
    }

    /// Replay a diff layer without executing anything.
    ///
    /// Destructs go first, then account fields, storage writes and codes.
    pub fn apply_diff(&mut self, diff: &DiffLayer) -> Result<(), StoreError> {
        for address in &diff.destructs {
            self.destruct(*address);
        }
        for change in &diff.accounts {
            let mut account = self.account(&change.address)?.unwrap_or_default();
            if let Some(nonce) = change.nonce {
                account.nonce = nonce;
            }
            if let Some(balance) = change.balance {
                account.balance = balance;
            }
            if let Some(code_hash) = change.code_hash {
                account.code_hash = code_hash;
            }
            self.set_account(change.address, account);
        }
        for slot in &diff.storage {
            self.set_storage(slot.address, slot.key, slot.value);
        }
        for code in &diff.codes {
            self.put_code(code.hash, code.code.clone());
        }
        Ok(())
    }

    /// Recompute the state commitment over every account, committed and
    /// pending.
    pub fn state_root(&self) -> Result<Hash256, StoreError> {
        let mut accounts: BTreeMap<Address, Account> =
            self.store.iter_accounts()?.into_iter().collect();
        for (address, entry) in &self.accounts {
            match entry {
                Some(account) => {
                    accounts.insert(*address, *account);
                }
                None => {
                    accounts.remove(address);
                }
            }
        }

        let mut encoded = Vec::with_capacity(accounts.len() * 108);
        for (address, account) in &accounts {
            let storage_root = self.storage_root(address)?;
            encoded.extend_from_slice(address.as_bytes());
            encoded.extend_from_slice(&account.nonce.to_be_bytes());
            encoded.extend_from_slice(&account.balance.to_be_bytes());
            encoded.extend_from_slice(account.code_hash.as_bytes());
            encoded.extend_from_slice(storage_root.as_bytes());
        }
        Ok(keccak256(&encoded))
    }

    /// Commitment to the non-zero slots of one account; zero when empty.
    pub fn storage_root(&self, address: &Address) -> Result<Hash256, StoreError> {
        let mut slots: BTreeMap<Hash256, Hash256> = if self.cleared.contains(address) {
            BTreeMap::new()
        } else {
            self.store.iter_storage(address)?.into_iter().collect()
        };
        if let Some(dirty) = self.storage.get(address) {
            for (key, value) in dirty {
                slots.insert(*key, *value);
            }
        }

        let mut parts: Vec<&[u8]> = Vec::new();
        for (key, value) in slots.iter().filter(|(_, v)| !v.is_zero()) {
            parts.push(key.as_bytes());
            parts.push(value.as_bytes());
        }
        if parts.is_empty() {
            return Ok(Hash256::ZERO);
        }
        Ok(keccak256_multi(&parts))
    }

    /// Canonical diff of everything this overlay changed.
    pub fn to_diff(&self, block_hash: BlockHash, number: u64, receipts: Vec<Receipt>) -> DiffLayer {
        let accounts = self
            .accounts
            .iter()
            .filter_map(|(address, entry)| {
                entry.map(|account| DiffAccount {
                    address: *address,
                    nonce: Some(account.nonce),
                    balance: Some(account.balance),
                    code_hash: Some(account.code_hash),
                })
            })
            .collect();
        let storage = self
            .storage
            .iter()
            .flat_map(|(address, slots)| {
                slots.iter().map(move |(key, value)| DiffStorage {
                    address: *address,
                    key: *key,
                    value: *value,
                })
            })
            .collect();
        let codes = self
            .live_codes()
            .map(|(hash, code)| DiffCode {
                hash: *hash,
                code: code.clone(),
            })
            .collect();

        DiffLayer {
            block_hash,
            number,
            receipts,
            codes,
            destructs: self.destructs.iter().copied().collect(),
            accounts,
            storage,
            diff_hash: Hash256::ZERO,
        }
    }

    /// Append the overlay's writes to `batch`, storage clears first.
    pub fn write_into(&self, batch: &mut WriteBatch) {
        for address in &self.cleared {
            batch.clear_storage(*address);
        }
        for (address, entry) in &self.accounts {
            match entry {
                Some(account) => batch.put_account(*address, *account),
                None => batch.delete_account(*address),
            }
        }
        for (address, slots) in &self.storage {
            for (key, value) in slots {
                batch.put_storage(*address, *key, *value);
            }
        }
        for (hash, code) in self.live_codes() {
            batch.put_code(*hash, code.clone());
        }
    }
}
