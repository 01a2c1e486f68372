//! Block storage trait.

use crate::StoreError;
use dsync_types::BlockHash;

/// Trait for block storage operations.
pub trait BlockStore {
    /// Retrieve a serialized block by hash.
    fn get_block(&self, hash: &BlockHash) -> Result<Vec<u8>, StoreError>;

    /// Check if a block exists.
    fn exists(&self, hash: &BlockHash) -> Result<bool, StoreError>;

    /// Canonical block hash at `number`, if one has been committed.
    fn get_canonical_hash(&self, number: u64) -> Result<Option<BlockHash>, StoreError>;

    /// Total number of blocks in the store.
    fn block_count(&self) -> Result<u64, StoreError>;
}
