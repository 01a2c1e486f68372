//! Contract code storage trait.

use crate::StoreError;
use dsync_types::Hash256;

/// Code blobs keyed by their Keccak-256 hash.
pub trait CodeStore {
    fn get_code(&self, code_hash: &Hash256) -> Result<Option<Vec<u8>>, StoreError>;
}
