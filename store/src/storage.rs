//! Contract storage trait.

use crate::StoreError;
use dsync_types::{Address, Hash256};

/// Trait for reading committed storage slots.
///
/// Absent slots read as `Hash256::ZERO`; a zero value is never stored.
pub trait StorageStore {
    fn get_storage(&self, address: &Address, key: &Hash256) -> Result<Hash256, StoreError>;

    /// All non-zero slots of one account, in ascending key order.
    fn iter_storage(&self, address: &Address) -> Result<Vec<(Hash256, Hash256)>, StoreError>;
}
