//! Account storage trait.

use crate::StoreError;
use dsync_types::{Address, Hash256};
use serde::{Deserialize, Serialize};

/// Per-account state committed at the head block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: u128,
    /// Keccak-256 of the account's code, zero when it has none.
    pub code_hash: Hash256,
}

impl Account {
    pub fn with_balance(balance: u128) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    pub fn has_code(&self) -> bool {
        !self.code_hash.is_zero()
    }
}

/// Trait for reading committed accounts.
pub trait AccountStore {
    fn get_account(&self, address: &Address) -> Result<Option<Account>, StoreError>;

    /// All accounts, in ascending address order.
    fn iter_accounts(&self) -> Result<Vec<(Address, Account)>, StoreError>;

    fn account_count(&self) -> Result<u64, StoreError> {
        self.iter_accounts().map(|v| v.len() as u64)
    }
}
